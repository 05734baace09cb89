// =============================================================================
// Conclave Federated Messaging Server - Membership Event Store
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   Storage seam for membership events. The store is durable and ordered
//   per room; an append is committed only once the store acknowledges it
//   with a stream position. The in-memory implementation backs tests and
//   single-node deployments.
//
// =============================================================================

use std::{
    collections::HashMap,
    sync::RwLock,
};

use async_trait::async_trait;
use ruma::{OwnedRoomId, RoomId};

use super::MembershipEvent;
use crate::Result;

/// Membership event storage trait
#[async_trait]
pub trait Data: Send + Sync {
    /// Durably append an event to its room's stream. Returns the event's
    /// position in that stream; positions are strictly increasing per room.
    /// Fails with `Error::Persistence` when the write is not acknowledged.
    async fn append_membership_event(&self, event: &MembershipEvent) -> Result<u64>;

    /// All membership events of a room, in stream order
    async fn membership_events(&self, room_id: &RoomId) -> Result<Vec<MembershipEvent>>;
}

/// In-memory event store
#[derive(Debug, Default)]
pub struct MemoryStore {
    streams: RwLock<HashMap<OwnedRoomId, Vec<MembershipEvent>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Data for MemoryStore {
    async fn append_membership_event(&self, event: &MembershipEvent) -> Result<u64> {
        let mut streams = self.streams.write().expect("stream map lock");
        let stream = streams.entry(event.room_id.clone()).or_default();
        stream.push(event.clone());
        Ok(stream.len() as u64)
    }

    async fn membership_events(&self, room_id: &RoomId) -> Result<Vec<MembershipEvent>> {
        Ok(self
            .streams
            .read()
            .expect("stream map lock")
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }
}
