// =============================================================================
// Conclave Federated Messaging Server - Membership State Machine
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   Pure membership transition rules. Given the current state of a
//   (user, room) pair, a requested action and the actor's standing, compute
//   the next state or fail with Forbidden. No side effects here; callers
//   apply the result.
//
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Power level required to kick or ban
pub const PL_KICK: i64 = 50;
pub const PL_BAN: i64 = 50;
/// Power level required to invite
pub const PL_INVITE: i64 = 0;

/// A requested change to a user's membership in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipAction {
    Join,
    Leave,
    Invite,
    Kick,
    Ban,
    Knock,
    ProfileUpdate,
}

impl fmt::Display for MembershipAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MembershipAction::Join => "join",
            MembershipAction::Leave => "leave",
            MembershipAction::Invite => "invite",
            MembershipAction::Kick => "kick",
            MembershipAction::Ban => "ban",
            MembershipAction::Knock => "knock",
            MembershipAction::ProfileUpdate => "profile_update",
        };
        write!(f, "{s}")
    }
}

/// The membership state of a (user, room) pair. Exactly one state holds at
/// a time; `None` is the state of a user the room has never seen (or whose
/// last event cleared them).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipState {
    #[default]
    None,
    Invite,
    Join,
    Leave,
    Ban,
    Knock,
}

impl fmt::Display for MembershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MembershipState::None => "none",
            MembershipState::Invite => "invite",
            MembershipState::Join => "join",
            MembershipState::Leave => "leave",
            MembershipState::Ban => "ban",
            MembershipState::Knock => "knock",
        };
        write!(f, "{s}")
    }
}

/// How a room admits new members
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinRule {
    Public,
    #[default]
    Invite,
    Knock,
}

/// The actor's standing relative to the target and room, resolved by the
/// coordinator before validation
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    /// Whether the acting user is the user whose membership changes
    pub actor_is_target: bool,
    /// The actor's power level in the room
    pub actor_power_level: i64,
    /// The room's join rule
    pub join_rule: JoinRule,
}

/// Compute the legal next membership state, or fail with `Forbidden`.
///
/// A JOIN while already joined is legal and yields JOIN again: it re-states
/// the membership with new content (display name and the like). Callers must
/// not treat it as a fresh join; see the coordinator's rate-limit handling.
pub fn transition(
    current: MembershipState,
    action: MembershipAction,
    ctx: &TransitionContext,
) -> Result<MembershipState> {
    use MembershipAction as A;
    use MembershipState as S;

    match action {
        A::Join => {
            if !ctx.actor_is_target {
                return Err(Error::forbidden("cannot join on behalf of another user"));
            }
            match current {
                S::None | S::Invite | S::Join => Ok(S::Join),
                S::Leave if matches!(ctx.join_rule, JoinRule::Public | JoinRule::Knock) => {
                    Ok(S::Join)
                }
                S::Leave => Err(Error::forbidden("room is invite-only; you must be re-invited")),
                S::Ban => Err(Error::forbidden("you are banned from this room")),
                S::Knock => Err(Error::forbidden("knock is pending; wait for an invite")),
            }
        }
        A::ProfileUpdate => {
            if !ctx.actor_is_target {
                return Err(Error::forbidden("cannot edit another user's profile"));
            }
            match current {
                S::Join => Ok(S::Join),
                _ => Err(Error::forbidden("profile updates require a joined membership")),
            }
        }
        A::Leave => {
            if !ctx.actor_is_target {
                return Err(Error::forbidden("only the target may leave their own membership"));
            }
            match current {
                S::Join | S::Invite | S::Knock => Ok(S::Leave),
                _ => Err(Error::forbidden("not currently in this room")),
            }
        }
        A::Invite => {
            if ctx.actor_is_target {
                return Err(Error::forbidden("cannot invite yourself"));
            }
            if ctx.actor_power_level < PL_INVITE {
                return Err(Error::forbidden("insufficient power level to invite"));
            }
            match current {
                S::None | S::Leave | S::Knock => Ok(S::Invite),
                S::Invite => Err(Error::forbidden("already invited")),
                S::Join => Err(Error::forbidden("already in the room")),
                S::Ban => Err(Error::forbidden("user is banned from this room")),
            }
        }
        A::Kick => {
            if ctx.actor_is_target {
                return Err(Error::forbidden("cannot kick yourself; leave instead"));
            }
            if ctx.actor_power_level < PL_KICK {
                return Err(Error::forbidden("insufficient power level to kick"));
            }
            match current {
                S::Join | S::Invite | S::Knock => Ok(S::Leave),
                _ => Err(Error::forbidden("user is not in this room")),
            }
        }
        A::Ban => {
            if ctx.actor_is_target {
                return Err(Error::forbidden("cannot ban yourself"));
            }
            if ctx.actor_power_level < PL_BAN {
                return Err(Error::forbidden("insufficient power level to ban"));
            }
            match current {
                S::Ban => Err(Error::forbidden("already banned")),
                _ => Ok(S::Ban),
            }
        }
        A::Knock => {
            if !ctx.actor_is_target {
                return Err(Error::forbidden("cannot knock on behalf of another user"));
            }
            if ctx.join_rule != JoinRule::Knock {
                return Err(Error::forbidden("you are not allowed to knock on this room"));
            }
            match current {
                S::None | S::Leave => Ok(S::Knock),
                S::Knock => Err(Error::forbidden("already knocking")),
                S::Invite | S::Join => Err(Error::forbidden("already in the room")),
                S::Ban => Err(Error::forbidden("you are banned from this room")),
            }
        }
    }
}
