// =============================================================================
// Conclave Federated Messaging Server - Sending Module
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   Best-effort fan-out of applied membership events to downstream
//   consumers (sync streams, push, federation outbox). Delivery failures
//   are logged and never affect the membership update that triggered them.
//
// =============================================================================

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{service::rooms::membership::MembershipEvent, Result};

/// A downstream consumer of applied membership events
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Short name used in delivery failure logs
    fn name(&self) -> &str;

    async fn notify(&self, event: &MembershipEvent) -> Result<()>;
}

/// Event fan-out service
#[derive(Default)]
pub struct Service {
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers
            .write()
            .expect("subscriber list lock")
            .push(subscriber);
    }

    /// Deliver an applied event to every subscriber. A failing subscriber
    /// is logged and skipped; the caller never sees the failure.
    pub async fn notify(&self, event: &MembershipEvent) {
        let subscribers: Vec<_> = self
            .subscribers
            .read()
            .expect("subscriber list lock")
            .clone();
        debug!(
            "📣 Delivering {} to {} subscriber(s)",
            event.event_id,
            subscribers.len()
        );
        for subscriber in subscribers {
            if let Err(e) = subscriber.notify(event).await {
                warn!(
                    "🚧 Subscriber {} failed to handle {}: {e}",
                    subscriber.name(),
                    event.event_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        service::rooms::state_machine::{MembershipAction, MembershipState},
        utils, Error,
    };
    use ruma::{room_id, server_name, user_id};
    use std::sync::Mutex;

    fn event() -> MembershipEvent {
        MembershipEvent {
            event_id: utils::generate_event_id(),
            room_id: room_id!("!r:conclave.local").to_owned(),
            user_id: user_id!("@a:conclave.local").to_owned(),
            sender: user_id!("@a:conclave.local").to_owned(),
            action: MembershipAction::Join,
            resulting_state: MembershipState::Join,
            content: Default::default(),
            origin_server: server_name!("conclave.local").to_owned(),
            origin_server_ts: utils::millis_since_unix_epoch(),
        }
    }

    struct Recorder {
        seen: Mutex<Vec<ruma::OwnedEventId>>,
    }

    #[async_trait]
    impl Subscriber for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn notify(&self, event: &MembershipEvent) -> Result<()> {
            self.seen.lock().unwrap().push(event.event_id.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Subscriber for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn notify(&self, _event: &MembershipEvent) -> Result<()> {
            Err(Error::Persistence("downstream queue full".to_owned()))
        }
    }

    #[tokio::test]
    async fn test_all_subscribers_are_notified() {
        let sending = Service::new();
        let a = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let b = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        sending.register(a.clone());
        sending.register(b.clone());

        let event = event();
        sending.notify(&event).await;
        assert_eq!(a.seen.lock().unwrap().as_slice(), &[event.event_id.clone()]);
        assert_eq!(b.seen.lock().unwrap().as_slice(), &[event.event_id.clone()]);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let sending = Service::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        sending.register(Arc::new(Failing));
        sending.register(recorder.clone());

        sending.notify(&event()).await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }
}
