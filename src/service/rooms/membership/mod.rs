// =============================================================================
// Conclave Federated Messaging Server - Membership Coordinator
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   The single entry point for membership changes. Serializes updates per
//   (user, room) pair, applies rate limits before any state is touched,
//   validates the transition, then either applies the event locally or
//   orchestrates a join through a resident server. Local and remote joins
//   to a room draw from the same per-room token bucket.
//
// =============================================================================

pub mod data;

pub use data::{Data, MemoryStore};

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use ruma::{OwnedEventId, OwnedRoomId, OwnedServerName, OwnedUserId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::{
        RC_INVITES_PER_ISSUER, RC_INVITES_PER_ROOM, RC_JOINS_LOCAL, RC_JOINS_PER_ROOM,
        RC_JOINS_REMOTE,
    },
    service::{
        federation, globals, sending,
        rooms::{
            state_cache,
            state_machine::{
                self, JoinRule, MembershipAction, MembershipState, TransitionContext,
            },
        },
    },
    utils, Error, Result,
};

/// Opaque event payload (display name, avatar, reasons and the like)
pub type EventContent = serde_json::Map<String, serde_json::Value>;

/// An applied membership event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipEvent {
    pub event_id: OwnedEventId,
    pub room_id: OwnedRoomId,
    /// The user whose membership this event changes
    pub user_id: OwnedUserId,
    /// The user who requested the change
    pub sender: OwnedUserId,
    pub action: MembershipAction,
    pub resulting_state: MembershipState,
    pub content: EventContent,
    /// The server the event originated on; ours for local applies, the
    /// resident server's for remote joins
    pub origin_server: OwnedServerName,
    pub origin_server_ts: u64,
}

type PairKey = (OwnedUserId, OwnedRoomId);

/// Membership update coordinator
pub struct Service {
    pub db: Arc<dyn Data>,
    globals: Arc<globals::Service>,
    rate_limiter: Arc<crate::service::rate_limiter::Service>,
    state_cache: Arc<state_cache::Service>,
    federation: Arc<federation::Service>,
    sending: Arc<sending::Service>,

    /// Joins a resident server accepted but we failed to record, keyed by
    /// pair with the server that accepted. Settled on the next join attempt
    /// by re-querying that server instead of re-sending the join.
    pending_remote_joins: RwLock<HashMap<PairKey, OwnedServerName>>,
}

impl Service {
    pub fn new(
        db: Arc<dyn Data>,
        globals: Arc<globals::Service>,
        rate_limiter: Arc<crate::service::rate_limiter::Service>,
        state_cache: Arc<state_cache::Service>,
        federation: Arc<federation::Service>,
        sending: Arc<sending::Service>,
    ) -> Self {
        Self {
            db,
            globals,
            rate_limiter,
            state_cache,
            federation,
            sending,
            pending_remote_joins: RwLock::new(HashMap::new()),
        }
    }

    /// Create a room on this server and join the creator to it.
    ///
    /// The creator's join runs through the normal update path and therefore
    /// consumes a token from the room's join bucket, so a freshly created
    /// room starts with one token already spent.
    #[instrument(skip(self))]
    pub async fn create_room(
        &self,
        creator: &UserId,
        room_id: &RoomId,
        join_rule: JoinRule,
    ) -> Result<MembershipEvent> {
        if !self.globals.user_is_local(creator) {
            return Err(Error::forbidden("rooms can only be created by local users"));
        }
        self.state_cache.register_local_room(room_id, join_rule, creator);
        info!("🏠 Created room {room_id} for {creator}");
        self.update_membership(
            creator,
            creator,
            room_id,
            MembershipAction::Join,
            EventContent::new(),
        )
        .await
    }

    /// Change `target`'s membership in `room_id` on behalf of `requester`.
    ///
    /// All updates for a (target, room) pair are serialized; the decision
    /// order under the lock is fixed: rate limits first, then transition
    /// validation, then the local or remote apply. A denial or rejection at
    /// any step leaves membership state untouched (spent tokens stay spent).
    #[instrument(skip(self, content))]
    pub async fn update_membership(
        &self,
        requester: &UserId,
        target: &UserId,
        room_id: &RoomId,
        action: MembershipAction,
        content: EventContent,
    ) -> Result<MembershipEvent> {
        let mutex = self.globals.membership_mutex(target, room_id).await;
        let _lock = mutex.lock().await;

        // Settle a join whose remote half succeeded but whose local
        // recording failed before considering anything new for this pair.
        if action == MembershipAction::Join {
            if let Some(event) = self.reconcile_pending_join(target, room_id).await? {
                return Ok(event);
            }
        }

        let current = self.state_cache.membership(target, room_id);
        // A join while already joined only re-states content and is
        // not rate limited.
        let genuine_join = action == MembershipAction::Join && current != MembershipState::Join;
        let local = self.state_cache.server_in_room(room_id);
        let exempt = self.globals.user_is_exempt(requester);

        if exempt {
            debug!("🚦 {requester} is exempt from rate limiting");
        } else {
            match action {
                MembershipAction::Join if genuine_join => {
                    let requester_policy = if local { RC_JOINS_LOCAL } else { RC_JOINS_REMOTE };
                    self.rate_limiter
                        .check_and_consume(requester_policy, requester.as_str())?;
                    if local {
                        self.rate_limiter
                            .check_and_consume(RC_JOINS_PER_ROOM, room_id.as_str())?;
                    } else {
                        // The room bucket is only charged after the remote
                        // server accepts; see remote_join.
                        self.rate_limiter.check(RC_JOINS_PER_ROOM, room_id.as_str())?;
                    }
                }
                MembershipAction::Invite => {
                    self.rate_limiter
                        .check_and_consume(RC_INVITES_PER_ISSUER, requester.as_str())?;
                    self.rate_limiter
                        .check_and_consume(RC_INVITES_PER_ROOM, room_id.as_str())?;
                }
                _ => {}
            }
        }

        // Acting on another user's membership requires being in the room.
        if matches!(
            action,
            MembershipAction::Invite | MembershipAction::Kick | MembershipAction::Ban
        ) && self.state_cache.membership(requester, room_id) != MembershipState::Join
        {
            return Err(Error::forbidden("you are not in this room"));
        }

        let ctx = TransitionContext {
            actor_is_target: requester == target,
            actor_power_level: self.state_cache.user_power_level(room_id, requester),
            join_rule: self.state_cache.join_rule(room_id),
        };
        let next = state_machine::transition(current, action, &ctx)?;

        if action == MembershipAction::Join && !local {
            self.remote_join(requester, target, room_id, content, exempt)
                .await
        } else {
            self.apply_local(requester, target, room_id, action, next, content)
                .await
        }
    }

    /// Build, persist and announce an event for a room this server
    /// participates in. State is only updated after the store acknowledges
    /// the append.
    async fn apply_local(
        &self,
        sender: &UserId,
        target: &UserId,
        room_id: &RoomId,
        action: MembershipAction,
        next: MembershipState,
        content: EventContent,
    ) -> Result<MembershipEvent> {
        let event = MembershipEvent {
            event_id: utils::generate_event_id(),
            room_id: room_id.to_owned(),
            user_id: target.to_owned(),
            sender: sender.to_owned(),
            action,
            resulting_state: next,
            content,
            origin_server: self.globals.server_name().to_owned(),
            origin_server_ts: utils::millis_since_unix_epoch(),
        };

        let position = self.db.append_membership_event(&event).await?;
        self.state_cache.update_membership(target, room_id, next);
        info!("📝 Applied {action} for {target} in {room_id} at position {position}");

        self.sending.notify(&event).await;
        Ok(event)
    }

    /// Join through a resident server, then record the result locally and
    /// charge the room's join bucket.
    async fn remote_join(
        &self,
        requester: &UserId,
        target: &UserId,
        room_id: &RoomId,
        content: EventContent,
        exempt: bool,
    ) -> Result<MembershipEvent> {
        let remote = self
            .federation
            .remote_join(target, room_id, &content, &[])
            .await?;

        let event = MembershipEvent {
            event_id: remote.event_id,
            room_id: room_id.to_owned(),
            user_id: target.to_owned(),
            sender: requester.to_owned(),
            action: MembershipAction::Join,
            resulting_state: MembershipState::Join,
            content,
            origin_server: remote.server.clone(),
            origin_server_ts: utils::millis_since_unix_epoch(),
        };

        if let Err(e) = self.db.append_membership_event(&event).await {
            // The resident server already admitted us; remember who so the
            // next attempt can re-query instead of re-joining.
            warn!(
                "🚧 {} accepted join for {target} in {room_id} but recording failed: {e}",
                remote.server
            );
            self.pending_remote_joins
                .write()
                .expect("pending join lock")
                .insert((target.to_owned(), room_id.to_owned()), remote.server);
            return Err(e);
        }

        self.state_cache
            .update_membership(target, room_id, MembershipState::Join);
        if !exempt {
            self.rate_limiter.record(RC_JOINS_PER_ROOM, room_id.as_str())?;
        }
        info!(
            "🌐 {target} joined {room_id} via {} (remote position {})",
            event.origin_server, remote.stream_position
        );

        self.sending.notify(&event).await;
        Ok(event)
    }

    /// Settle a possibly-joined pair by asking the server that accepted the
    /// original join. Returns the recorded event when the user turned out
    /// to be joined.
    async fn reconcile_pending_join(
        &self,
        target: &UserId,
        room_id: &RoomId,
    ) -> Result<Option<MembershipEvent>> {
        let server = self
            .pending_remote_joins
            .read()
            .expect("pending join lock")
            .get(&(target.to_owned(), room_id.to_owned()))
            .cloned();
        let Some(server) = server else {
            return Ok(None);
        };

        debug!("🔎 Settling possibly-joined {target} in {room_id} via {server}");
        let state = self
            .federation
            .query_membership(&server, room_id, target)
            .await?;

        if state != MembershipState::Join {
            // The earlier join never stuck; fall through to a fresh attempt.
            self.forget_pending(target, room_id);
            return Ok(None);
        }

        // The original event id was lost with the failed write; record a
        // synthesized event carrying the queried outcome.
        let event = MembershipEvent {
            event_id: utils::generate_event_id(),
            room_id: room_id.to_owned(),
            user_id: target.to_owned(),
            sender: target.to_owned(),
            action: MembershipAction::Join,
            resulting_state: MembershipState::Join,
            content: EventContent::new(),
            origin_server: server.clone(),
            origin_server_ts: utils::millis_since_unix_epoch(),
        };
        let position = self.db.append_membership_event(&event).await?;
        self.state_cache
            .update_membership(target, room_id, MembershipState::Join);
        if !self.globals.user_is_exempt(target) {
            self.rate_limiter.record(RC_JOINS_PER_ROOM, room_id.as_str())?;
        }
        self.forget_pending(target, room_id);
        info!("🔎 Settled {target} as joined to {room_id} at position {position}");

        self.sending.notify(&event).await;
        Ok(Some(event))
    }

    fn forget_pending(&self, target: &UserId, room_id: &RoomId) {
        self.pending_remote_joins
            .write()
            .expect("pending join lock")
            .remove(&(target.to_owned(), room_id.to_owned()));
    }

    /// Whether a pair is awaiting reconciliation with a resident server
    pub fn has_pending_remote_join(&self, target: &UserId, room_id: &RoomId) -> bool {
        self.pending_remote_joins
            .read()
            .expect("pending join lock")
            .contains_key(&(target.to_owned(), room_id.to_owned()))
    }
}
