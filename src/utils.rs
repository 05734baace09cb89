//! Utility functions shared across Conclave services.

use std::time::{SystemTime, UNIX_EPOCH};

use ruma::{EventId, OwnedEventId};
use uuid::Uuid;

/// Milliseconds since the unix epoch, as used in `origin_server_ts`
pub fn millis_since_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time is valid")
        .as_millis() as u64
}

/// Generate a fresh opaque event id.
///
/// Locally created membership events are identified by a random opaque id;
/// events received over federation keep the id the origin assigned.
pub fn generate_event_id() -> OwnedEventId {
    EventId::parse(format!("${}", Uuid::new_v4().simple()))
        .expect("generated event ids are valid")
}
