use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::event_sourcing::core::{Aggregate, Event, OutboxRecord, StoredSnapshot};

use super::error::StoreError;

/// Durable log of events waiting to be published.
#[async_trait]
pub trait OutboxStorage: Send + Sync {
    /// Appends events as pending. Saving nothing is a no-op.
    async fn save(&self, events: &[Event]) -> Result<(), StoreError>;

    /// Every record without a publication time.
    async fn get_pending(&self) -> Result<Vec<Event>, StoreError>;

    /// Stamps the record as published. `NotFound` when it is missing or was
    /// already published.
    async fn mark_as_published(&self, id: &str) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<OutboxRecord, StoreError>;
}

/// Persists aggregate snapshots together with their staged events.
#[async_trait]
pub trait AggregateWriter: Send + Sync {
    /// Succeeds only if the stored version equals `aggregate.version().loaded()`.
    async fn save<A: Aggregate>(&self, aggregate: &mut A) -> Result<(), StoreError>;

    async fn load<S>(&self, id: &str) -> Result<StoredSnapshot<S>, StoreError>
    where
        S: DeserializeOwned + Send;
}
