use chrono::{DateTime, Utc};
use serde::Serialize;

use super::buffer::EventBuffer;
use super::event::Event;
use super::version::Version;

// ============================================================================
// Aggregate Persistence Contract
// ============================================================================
//
// The writer never sees domain behaviour. It only needs:
// 1. A stable identity
// 2. The version token the instance was loaded with
// 3. A serializable snapshot of the current state
// 4. The events staged during the current unit of work
//
// ============================================================================

pub trait Aggregate: Send + Sync {
    type Snapshot: Serialize + Send;

    fn id(&self) -> &str;

    fn version(&self) -> &Version;

    fn take_snapshot(&self) -> Self::Snapshot;

    fn events(&mut self) -> &mut EventBuffer;
}

/// Durable outbox row: the event plus when it was handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub event: Event,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn pending(event: Event) -> Self {
        Self {
            event,
            published_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.published_at.is_none()
    }
}

/// Snapshot read back from storage, with the version it was stored at.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot<S> {
    pub id: String,
    pub version: Version,
    pub snapshot: S,
}
