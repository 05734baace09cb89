// =============================================================================
// Conclave Federated Messaging Server - Service Container
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   Wires the services together. Callers hand in the event store and the
//   federation transport; everything else is built from the configuration.
//
// =============================================================================

pub mod federation;
pub mod globals;
pub mod rate_limiter;
pub mod rooms;
pub mod sending;

use std::sync::Arc;

use tracing::info;

use crate::{config::Config, Result};

/// All services of a running server
pub struct Services {
    pub globals: Arc<globals::Service>,
    pub rate_limiter: Arc<rate_limiter::Service>,
    pub rooms: rooms::Service,
    pub federation: Arc<federation::Service>,
    pub sending: Arc<sending::Service>,
}

impl Services {
    pub fn build(
        config: Config,
        db: Arc<dyn rooms::membership::Data>,
        federation_client: Arc<dyn federation::Client>,
    ) -> Result<Self> {
        let globals = Arc::new(globals::Service::load(config)?);
        info!("🚀 Starting services for {}", globals.server_name());

        let rate_limiter = Arc::new(rate_limiter::Service::new(
            globals.config().rate_limiting.policies(),
        ));
        let state_cache = Arc::new(rooms::state_cache::Service::new(Arc::clone(&globals)));
        let federation = Arc::new(federation::Service::new(
            federation_client,
            Arc::clone(&globals),
        ));
        let sending = Arc::new(sending::Service::new());
        let membership = Arc::new(rooms::membership::Service::new(
            db,
            Arc::clone(&globals),
            Arc::clone(&rate_limiter),
            Arc::clone(&state_cache),
            Arc::clone(&federation),
            Arc::clone(&sending),
        ));

        Ok(Self {
            globals,
            rate_limiter,
            rooms: rooms::Service {
                membership,
                state_cache,
            },
            federation,
            sending,
        })
    }
}
