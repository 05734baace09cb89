// =============================================================================
// Conclave Federated Messaging Server - Room State Cache
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   Authoritative in-memory view of room membership: the current state of
//   every (user, room) pair this server has seen, room join rules and power
//   levels, and whether this server participates in a room. The membership
//   map is only mutated through validated transitions applied by the
//   membership coordinator.
//
// =============================================================================

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use ruma::{OwnedRoomId, OwnedUserId, RoomId, UserId};
use tracing::debug;

use super::state_machine::{JoinRule, MembershipState};
use crate::service::globals;

/// Per-room bookkeeping
#[derive(Debug, Default)]
struct RoomInfo {
    /// Whether this room was created on this server
    created_locally: bool,
    join_rule: JoinRule,
    /// Explicit power levels; absent users have power level 0
    power_levels: HashMap<OwnedUserId, i64>,
    /// Number of local users currently joined
    local_joined_count: u64,
}

/// Membership state cache
pub struct Service {
    globals: Arc<globals::Service>,
    memberships: RwLock<HashMap<(OwnedUserId, OwnedRoomId), MembershipState>>,
    rooms: RwLock<HashMap<OwnedRoomId, RoomInfo>>,
}

impl Service {
    pub fn new(globals: Arc<globals::Service>) -> Self {
        Self {
            globals,
            memberships: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// The current membership state of (user, room); `None` for pairs the
    /// server has never recorded
    pub fn membership(&self, user_id: &UserId, room_id: &RoomId) -> MembershipState {
        self.memberships
            .read()
            .expect("membership map lock")
            .get(&(user_id.to_owned(), room_id.to_owned()))
            .copied()
            .unwrap_or_default()
    }

    /// Record a validated membership transition and maintain the local
    /// joined count
    pub fn update_membership(&self, user_id: &UserId, room_id: &RoomId, state: MembershipState) {
        let previous = {
            let mut memberships = self.memberships.write().expect("membership map lock");
            memberships
                .insert((user_id.to_owned(), room_id.to_owned()), state)
                .unwrap_or_default()
        };

        if self.globals.user_is_local(user_id) && previous != state {
            let mut rooms = self.rooms.write().expect("room map lock");
            let info = rooms.entry(room_id.to_owned()).or_default();
            if previous == MembershipState::Join {
                info.local_joined_count = info.local_joined_count.saturating_sub(1);
            }
            if state == MembershipState::Join {
                info.local_joined_count += 1;
            }
        }
        debug!("Membership of {user_id} in {room_id} is now {state}");
    }

    /// Whether this server participates in the room, either because it was
    /// created here or because a local user is joined
    pub fn server_in_room(&self, room_id: &RoomId) -> bool {
        self.rooms
            .read()
            .expect("room map lock")
            .get(room_id)
            .map(|info| info.created_locally || info.local_joined_count > 0)
            .unwrap_or(false)
    }

    pub fn join_rule(&self, room_id: &RoomId) -> JoinRule {
        self.rooms
            .read()
            .expect("room map lock")
            .get(room_id)
            .map(|info| info.join_rule)
            .unwrap_or_default()
    }

    pub fn set_join_rule(&self, room_id: &RoomId, join_rule: JoinRule) {
        self.rooms
            .write()
            .expect("room map lock")
            .entry(room_id.to_owned())
            .or_default()
            .join_rule = join_rule;
    }

    /// The user's power level in the room; users without an explicit entry
    /// have power level 0
    pub fn user_power_level(&self, room_id: &RoomId, user_id: &UserId) -> i64 {
        self.rooms
            .read()
            .expect("room map lock")
            .get(room_id)
            .and_then(|info| info.power_levels.get(user_id).copied())
            .unwrap_or(0)
    }

    pub fn set_user_power_level(&self, room_id: &RoomId, user_id: &UserId, level: i64) {
        self.rooms
            .write()
            .expect("room map lock")
            .entry(room_id.to_owned())
            .or_default()
            .power_levels
            .insert(user_id.to_owned(), level);
    }

    /// Register a room created on this server. The creator gets the
    /// customary power level 100.
    pub fn register_local_room(&self, room_id: &RoomId, join_rule: JoinRule, creator: &UserId) {
        let mut rooms = self.rooms.write().expect("room map lock");
        let info = rooms.entry(room_id.to_owned()).or_default();
        info.created_locally = true;
        info.join_rule = join_rule;
        info.power_levels.insert(creator.to_owned(), 100);
        debug!("Registered local room {room_id} with join rule {join_rule:?}");
    }

    /// Currently joined members of a room, in no particular order
    pub fn room_members(&self, room_id: &RoomId) -> Vec<OwnedUserId> {
        self.memberships
            .read()
            .expect("membership map lock")
            .iter()
            .filter(|((_, room), state)| room == room_id && **state == MembershipState::Join)
            .map(|((user, _), _)| user.clone())
            .collect()
    }

    /// Number of local users currently joined to the room
    pub fn local_joined_count(&self, room_id: &RoomId) -> u64 {
        self.rooms
            .read()
            .expect("room map lock")
            .get(room_id)
            .map(|info| info.local_joined_count)
            .unwrap_or(0)
    }
}
