// =============================================================================
// Conclave Federated Messaging Server - Rooms Module
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   Room-scoped services: the pure membership transition rules, the cached
//   membership state, and the coordinator that drives updates through them.
//
// =============================================================================

pub mod membership;
pub mod state_cache;
pub mod state_machine;

use std::sync::Arc;

/// Room service bundle
pub struct Service {
    pub membership: Arc<membership::Service>,
    pub state_cache: Arc<state_cache::Service>,
}
