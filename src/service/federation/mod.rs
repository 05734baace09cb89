// =============================================================================
// Conclave Federated Messaging Server - Federation Module
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   Remote join orchestration. When this server does not participate in a
//   room, joining goes through a resident server: candidates are tried in
//   order and the first server that signs the join wins. The transport is
//   behind the `Client` trait so tests can stand in for the network.
//
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use ruma::{OwnedEventId, OwnedServerName, RoomId, ServerName, UserId};
use tracing::{info, instrument, warn};

use crate::{
    service::{
        globals,
        rooms::{membership::EventContent, state_machine::MembershipState},
    },
    Error, Result,
};

/// A join accepted and signed by a resident server
#[derive(Debug, Clone)]
pub struct SignedJoin {
    pub event_id: OwnedEventId,
    /// The event's position in the resident server's room stream
    pub stream_position: u64,
}

/// The outcome of a successful remote join
#[derive(Debug, Clone)]
pub struct RemoteJoin {
    pub event_id: OwnedEventId,
    pub stream_position: u64,
    /// The server that accepted the join
    pub server: OwnedServerName,
}

/// Federation transport
#[async_trait]
pub trait Client: Send + Sync {
    /// Ask a resident server to admit the user. On success the returned
    /// event is already part of the room on that server.
    async fn send_join(
        &self,
        server: &ServerName,
        room_id: &RoomId,
        user_id: &UserId,
        content: &EventContent,
    ) -> Result<SignedJoin>;

    /// Ask a resident server for the user's current membership in the room
    async fn query_membership(
        &self,
        server: &ServerName,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<MembershipState>;
}

/// Remote join orchestrator
pub struct Service {
    client: Arc<dyn Client>,
    globals: Arc<globals::Service>,
}

impl Service {
    pub fn new(client: Arc<dyn Client>, globals: Arc<globals::Service>) -> Self {
        Self { client, globals }
    }

    /// Join `user_id` to a room this server does not participate in.
    ///
    /// Candidates are the caller-provided `via` hints followed by the server
    /// named in the room ID; our own server is never a candidate. Servers
    /// are tried in order and the first acceptance wins. When every
    /// candidate fails, the last error is surfaced.
    #[instrument(skip(self, content))]
    pub async fn remote_join(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        content: &EventContent,
        via: &[OwnedServerName],
    ) -> Result<RemoteJoin> {
        let mut last_error = Error::RemoteUnreachable(format!(
            "no candidate servers to join {room_id} through"
        ));
        let mut tried_any = false;

        for server in self.candidate_servers(room_id, via) {
            if server == self.globals.server_name() {
                continue;
            }
            tried_any = true;
            info!("🌐 Asking {server} to admit {user_id} into {room_id}");
            match self
                .client
                .send_join(&server, room_id, user_id, content)
                .await
            {
                Ok(signed) => {
                    info!(
                        "✅ {server} accepted join {} at position {}",
                        signed.event_id, signed.stream_position
                    );
                    return Ok(RemoteJoin {
                        event_id: signed.event_id,
                        stream_position: signed.stream_position,
                        server,
                    });
                }
                Err(e) => {
                    warn!("🚧 {server} could not assist joining {room_id}: {e}");
                    last_error = e;
                }
            }
        }

        if !tried_any {
            warn!("🚧 No remote candidates for {room_id}");
        }
        Err(last_error)
    }

    /// Re-query a specific server for the user's membership, used to settle
    /// joins whose outcome is ambiguous on our side
    pub async fn query_membership(
        &self,
        server: &ServerName,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<MembershipState> {
        self.client.query_membership(server, room_id, user_id).await
    }

    fn candidate_servers(&self, room_id: &RoomId, via: &[OwnedServerName]) -> Vec<OwnedServerName> {
        let mut candidates: Vec<OwnedServerName> = via.to_vec();
        if let Some(resident) = room_id.server_name() {
            let resident = resident.to_owned();
            if !candidates.contains(&resident) {
                candidates.push(resident);
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, utils};
    use ruma::{room_id, server_name, user_id};
    use std::sync::Mutex;

    /// Scripted transport: each server either accepts or refuses.
    struct FakeClient {
        accepting: Vec<OwnedServerName>,
        contacted: Mutex<Vec<OwnedServerName>>,
    }

    impl FakeClient {
        fn accepting(servers: &[&ServerName]) -> Self {
            Self {
                accepting: servers.iter().map(|s| (*s).to_owned()).collect(),
                contacted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Client for FakeClient {
        async fn send_join(
            &self,
            server: &ServerName,
            _room_id: &RoomId,
            _user_id: &UserId,
            _content: &EventContent,
        ) -> Result<SignedJoin> {
            self.contacted.lock().unwrap().push(server.to_owned());
            if self.accepting.iter().any(|s| s == server) {
                Ok(SignedJoin {
                    event_id: utils::generate_event_id(),
                    stream_position: 7,
                })
            } else {
                Err(Error::RemoteUnreachable(format!("{server} timed out")))
            }
        }

        async fn query_membership(
            &self,
            _server: &ServerName,
            _room_id: &RoomId,
            _user_id: &UserId,
        ) -> Result<MembershipState> {
            Ok(MembershipState::None)
        }
    }

    fn service(client: Arc<dyn Client>) -> Service {
        let mut config = Config::default();
        config.server_name = "conclave.local".to_owned();
        Service::new(client, Arc::new(globals::Service::load(config).unwrap()))
    }

    #[tokio::test]
    async fn test_first_accepting_server_wins() {
        let client = Arc::new(FakeClient::accepting(&[server_name!("second.example.com")]));
        let federation = service(client.clone());
        let joined = federation
            .remote_join(
                user_id!("@alice:conclave.local"),
                room_id!("!r:far.example.com"),
                &EventContent::new(),
                &[
                    server_name!("first.example.com").to_owned(),
                    server_name!("second.example.com").to_owned(),
                ],
            )
            .await
            .unwrap();
        assert_eq!(joined.server, server_name!("second.example.com"));

        // far.example.com was never contacted; the search stopped early.
        let contacted = client.contacted.lock().unwrap().clone();
        assert_eq!(
            contacted,
            vec![
                server_name!("first.example.com").to_owned(),
                server_name!("second.example.com").to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn test_room_server_is_a_fallback_candidate() {
        let client = Arc::new(FakeClient::accepting(&[server_name!("far.example.com")]));
        let federation = service(client);
        let joined = federation
            .remote_join(
                user_id!("@alice:conclave.local"),
                room_id!("!r:far.example.com"),
                &EventContent::new(),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(joined.server, server_name!("far.example.com"));
    }

    #[tokio::test]
    async fn test_own_server_is_skipped() {
        let client = Arc::new(FakeClient::accepting(&[]));
        let federation = service(client.clone());
        let err = federation
            .remote_join(
                user_id!("@alice:conclave.local"),
                room_id!("!r:conclave.local"),
                &EventContent::new(),
                &[server_name!("conclave.local").to_owned()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteUnreachable(_)));
        assert!(client.contacted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_error_is_surfaced() {
        let client = Arc::new(FakeClient::accepting(&[]));
        let federation = service(client);
        let err = federation
            .remote_join(
                user_id!("@alice:conclave.local"),
                room_id!("!r:far.example.com"),
                &EventContent::new(),
                &[],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("far.example.com"));
    }
}
