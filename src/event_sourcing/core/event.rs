use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::utils::{Clock, IdGenerator};

// ============================================================================
// Event - Immutable Record of a Fact
// ============================================================================
//
// An event carries its identity, creation time, routing topic and an opaque
// payload. The payload is kept as JSON bytes: producers encode a typed value
// once, and consumers decode it into whatever type they expect with
// `Event::decode`. Nothing in the pipeline between them needs to know the
// concrete type.
//
// ============================================================================

/// Content type advertised for every encoded payload.
pub const PAYLOAD_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("invalid payload for topic {topic:?}")]
    InvalidPayload { topic: String },

    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode payload of event {id} to {target}: {source}")]
    Decode {
        id: String,
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Domain payloads know their routing topic and can validate themselves.
pub trait Payload: Serialize {
    fn topic(&self) -> &str;

    fn is_valid(&self) -> bool {
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    id: String,
    created_at: DateTime<Utc>,
    topic: String,
    payload: Vec<u8>,
}

impl Event {
    pub fn new<P: Payload>(
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
        payload: &P,
    ) -> Result<Self, EventError> {
        if !payload.is_valid() {
            return Err(EventError::InvalidPayload {
                topic: payload.topic().to_string(),
            });
        }

        let encoded = serde_json::to_vec(payload).map_err(EventError::Encode)?;

        Ok(Self {
            id: ids.generate(),
            created_at: clock.now(),
            topic: payload.topic().to_string(),
            payload: encoded,
        })
    }

    /// Rebuilds an event from its raw parts (storage row, broker delivery).
    pub fn restore(
        id: impl Into<String>,
        created_at: DateTime<Utc>,
        topic: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at,
            topic: topic.into(),
            payload,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decodes the payload into the type the caller expects.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_slice(&self.payload).map_err(|source| EventError::Decode {
            id: self.id.clone(),
            target: std::any::type_name::<T>(),
            source,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
