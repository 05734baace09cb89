// =============================================================================
// Conclave Federated Messaging Server - Library Crate
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   Rate-limited membership update pipeline for a federated messaging
//   server: per-room join token buckets, validated membership transitions,
//   local event application and remote join orchestration, all behind a
//   single coordinator that serializes updates per (user, room) pair.
//
// =============================================================================

pub mod config;
pub mod error;
pub mod service;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use service::{
    rooms::{
        membership::{EventContent, MembershipEvent},
        state_machine::{JoinRule, MembershipAction, MembershipState},
    },
    Services,
};

// Re-export common types
pub use ruma;
