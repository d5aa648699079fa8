use std::collections::HashSet;

use serde_json::Value;

use crate::event_sourcing::core::{Aggregate, Event};

use super::error::StoreError;

// ============================================================================
// Write Plan - What a Save Has To Do
// ============================================================================
//
//   modified | events | plan
//   ---------+--------+------------------------------------------------
//   yes      | yes    | Transactional: upsert snapshot + insert events
//   yes      | no     | UpsertOnly: single statement, no transaction
//   no       | yes    | AppendThenAssert: insert events, then check the
//            |        |   stored version (events stay on conflict)
//   no       | no     | Noop: no I/O at all
//
// The upsert filters on (id, version == loaded). When nothing matches an
// insert is attempted, and the primary key on id turns a stale writer into
// a unique violation, reported as Conflict.
//
// ============================================================================

/// First event id that appears more than once in the batch.
pub(crate) fn repeated_id(events: &[Event]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(events.len());
    events.iter().map(Event::id).find(|id| !seen.insert(*id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePlan {
    Noop,
    UpsertOnly,
    Transactional,
    AppendThenAssert,
}

impl WritePlan {
    pub fn decide(modified: bool, has_events: bool) -> Self {
        match (modified, has_events) {
            (true, true) => Self::Transactional,
            (true, false) => Self::UpsertOnly,
            (false, true) => Self::AppendThenAssert,
            (false, false) => Self::Noop,
        }
    }
}

/// Everything a writer needs, extracted from the aggregate up front.
#[derive(Debug)]
pub struct PreparedWrite {
    pub id: String,
    pub plan: WritePlan,
    pub loaded: i64,
    pub current: i64,
    /// `Null` unless the plan writes the snapshot.
    pub snapshot: Value,
    pub events: Vec<Event>,
}

impl PreparedWrite {
    /// Drains the aggregate's buffer and picks the plan. The buffer is empty
    /// afterwards whatever the outcome of the write.
    pub fn from_aggregate<A: Aggregate>(aggregate: &mut A) -> Result<Self, StoreError> {
        let events = aggregate.events().collect();
        let version = *aggregate.version();
        let plan = WritePlan::decide(version.modified(), !events.is_empty());

        let snapshot = match plan {
            WritePlan::Transactional | WritePlan::UpsertOnly => {
                serde_json::to_value(aggregate.take_snapshot())?
            }
            WritePlan::AppendThenAssert | WritePlan::Noop => Value::Null,
        };

        Ok(Self {
            id: aggregate.id().to_string(),
            plan,
            loaded: version.loaded(),
            current: version.current(),
            snapshot,
            events,
        })
    }

    pub fn conflict(&self) -> StoreError {
        StoreError::Conflict {
            id: self.id.clone(),
            expected: self.loaded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{EventBuffer, Version};
    use chrono::Utc;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Snapshot {
        total: u32,
    }

    struct Counter {
        version: Version,
        buffer: EventBuffer,
    }

    impl Aggregate for Counter {
        type Snapshot = Snapshot;

        fn id(&self) -> &str {
            "counter-1"
        }

        fn version(&self) -> &Version {
            &self.version
        }

        fn take_snapshot(&self) -> Snapshot {
            Snapshot { total: 7 }
        }

        fn events(&mut self) -> &mut EventBuffer {
            &mut self.buffer
        }
    }

    #[test]
    fn test_plan_table() {
        assert_eq!(WritePlan::decide(true, true), WritePlan::Transactional);
        assert_eq!(WritePlan::decide(true, false), WritePlan::UpsertOnly);
        assert_eq!(WritePlan::decide(false, true), WritePlan::AppendThenAssert);
        assert_eq!(WritePlan::decide(false, false), WritePlan::Noop);
    }

    #[test]
    fn test_prepare_drains_buffer_and_skips_snapshot_when_unmodified() {
        let mut counter = Counter {
            version: Version::restore(3),
            buffer: EventBuffer::new(),
        };
        counter
            .buffer
            .add(Event::restore("e1", Utc::now(), "counter.seen", b"{}".to_vec()));

        let prepared = PreparedWrite::from_aggregate(&mut counter).unwrap();

        assert_eq!(prepared.plan, WritePlan::AppendThenAssert);
        assert_eq!(prepared.loaded, 3);
        assert!(prepared.snapshot.is_null());
        assert_eq!(prepared.events.len(), 1);
        assert!(counter.buffer.is_empty());
    }

    #[test]
    fn test_prepare_takes_snapshot_when_modified() {
        let mut version = Version::restore(3);
        version.record_modification();
        let mut counter = Counter {
            version,
            buffer: EventBuffer::new(),
        };

        let prepared = PreparedWrite::from_aggregate(&mut counter).unwrap();

        assert_eq!(prepared.plan, WritePlan::UpsertOnly);
        assert_eq!(prepared.current, 4);
        assert_eq!(prepared.snapshot, serde_json::json!({"total": 7}));
    }

    #[test]
    fn test_repeated_id_finds_duplicates_within_a_batch() {
        let event = |id: &str| Event::restore(id, Utc::now(), "counter.seen", b"{}".to_vec());

        assert_eq!(repeated_id(&[event("e1"), event("e2")]), None);
        assert_eq!(repeated_id(&[event("e1"), event("e2"), event("e1")]), Some("e1"));
        assert_eq!(repeated_id(&[]), None);
    }
}
