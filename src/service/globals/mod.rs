// =============================================================================
// Conclave Federated Messaging Server - Globals Module
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   Server identity and cross-service shared state. Hands out the keyed
//   mutexes that serialize membership updates per (user, room) pair.
//
// =============================================================================

use std::{collections::HashMap, sync::Arc};

use ruma::{OwnedRoomId, OwnedServerName, OwnedUserId, RoomId, ServerName, UserId};
use tokio::sync::{Mutex, RwLock};

use crate::{config::Config, Error, Result};

type PairKey = (OwnedUserId, OwnedRoomId);

/// Map size at which idle pair mutexes are swept
const MUTEX_SWEEP_THRESHOLD: usize = 1024;

/// Global server state
pub struct Service {
    config: Config,
    server_name: OwnedServerName,

    /// One mutex per (user, room) pair. All membership updates for a pair
    /// run under its mutex; different pairs proceed concurrently.
    membership_mutex: RwLock<HashMap<PairKey, Arc<Mutex<()>>>>,
}

impl Service {
    pub fn load(config: Config) -> Result<Self> {
        config.validate()?;
        let server_name = ServerName::parse(&config.server_name)
            .map_err(|e| Error::InvalidConfig(format!("server_name: {e}")))?;
        Ok(Self {
            config,
            server_name,
            membership_mutex: RwLock::new(HashMap::new()),
        })
    }

    pub fn server_name(&self) -> &ServerName {
        &self.server_name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the given user is registered on this server
    pub fn user_is_local(&self, user_id: &UserId) -> bool {
        user_id.server_name() == self.server_name
    }

    /// Whether the given user is exempt from rate limiting
    pub fn user_is_exempt(&self, user_id: &UserId) -> bool {
        self.config
            .rate_limiting
            .exemptions
            .exempt_users
            .iter()
            .any(|exempt| exempt == user_id.as_str())
    }

    /// The mutex serializing membership updates for (user, room),
    /// created on first use.
    ///
    /// Once the map grows past a threshold, entries nobody holds are swept
    /// so the map stays bounded by the number of in-flight pairs rather
    /// than every pair ever seen.
    pub async fn membership_mutex(&self, user_id: &UserId, room_id: &RoomId) -> Arc<Mutex<()>> {
        let mut map = self.membership_mutex.write().await;
        if map.len() >= MUTEX_SWEEP_THRESHOLD {
            map.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        }
        Arc::clone(
            map.entry((user_id.to_owned(), room_id.to_owned()))
                .or_default(),
        )
    }

    /// Number of tracked pair mutexes, for introspection
    pub async fn membership_mutex_count(&self) -> usize {
        self.membership_mutex.read().await.len()
    }
}
