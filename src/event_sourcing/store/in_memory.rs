use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::event_sourcing::core::{Aggregate, Event, OutboxRecord, StoredSnapshot, Version};
use crate::metrics::Metrics;
use crate::utils::Clock;

use super::error::StoreError;
use super::traits::{AggregateWriter, OutboxStorage};
use super::write_plan::{repeated_id, PreparedWrite, WritePlan};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Same contracts as the Postgres store, for tests and single-process runs.
// One lock guards snapshots and outbox together. Each plan step takes the
// lock separately, so the append-then-assert plan still commits its events
// before the version check, like the database version does.
//
// ============================================================================

#[derive(Debug)]
struct Document {
    version: i64,
    snapshot: Value,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, HashMap<String, Document>>,
    outbox: Vec<OutboxRecord>,
    outbox_index: HashMap<String, usize>,
}

impl State {
    /// All or nothing: a batch with any known or repeated id stores nothing.
    fn append(&mut self, events: &[Event]) -> Result<(), StoreError> {
        let duplicate = events
            .iter()
            .map(Event::id)
            .find(|id| self.outbox_index.contains_key(*id))
            .or_else(|| repeated_id(events));

        if let Some(id) = duplicate {
            return Err(StoreError::DuplicateEvent(id.to_string()));
        }

        for event in events {
            self.outbox_index
                .insert(event.id().to_string(), self.outbox.len());
            self.outbox.push(OutboxRecord::pending(event.clone()));
        }

        Ok(())
    }

    /// Mirrors "UPDATE ... WHERE version = loaded, else INSERT".
    fn check_upsert(&self, table: &str, write: &PreparedWrite) -> Result<(), StoreError> {
        match self.tables.get(table).and_then(|docs| docs.get(&write.id)) {
            Some(doc) if doc.version != write.loaded => Err(write.conflict()),
            _ => Ok(()),
        }
    }

    fn upsert(&mut self, table: &str, write: &PreparedWrite) {
        self.tables.entry(table.to_string()).or_default().insert(
            write.id.clone(),
            Document {
                version: write.current,
                snapshot: write.snapshot.clone(),
            },
        );
    }
}

#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    /// Aggregate writer over one named collection, sharing this outbox.
    pub fn collection(&self, table: &str) -> InMemoryAggregateStore {
        InMemoryAggregateStore {
            store: self.clone(),
            table: table.to_string(),
            metrics: None,
        }
    }

    pub async fn published_count(&self) -> usize {
        let state = self.state.lock().await;
        state.outbox.iter().filter(|r| !r.is_pending()).count()
    }
}

#[async_trait]
impl OutboxStorage for InMemoryStore {
    async fn save(&self, events: &[Event]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }

        self.state.lock().await.append(events)
    }

    async fn get_pending(&self) -> Result<Vec<Event>, StoreError> {
        let state = self.state.lock().await;

        Ok(state
            .outbox
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| r.event.clone())
            .collect())
    }

    async fn mark_as_published(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        let index = *state
            .outbox_index
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let record = &mut state.outbox[index];
        if !record.is_pending() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        record.published_at = Some(self.clock.now());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<OutboxRecord, StoreError> {
        let state = self.state.lock().await;

        state
            .outbox_index
            .get(id)
            .map(|&index| state.outbox[index].clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[derive(Clone)]
pub struct InMemoryAggregateStore {
    store: InMemoryStore,
    table: String,
    metrics: Option<Arc<Metrics>>,
}

impl InMemoryAggregateStore {
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn execute(&self, write: &PreparedWrite) -> Result<(), StoreError> {
        match write.plan {
            WritePlan::Noop => Ok(()),

            WritePlan::UpsertOnly => {
                let mut state = self.store.state.lock().await;
                state.check_upsert(&self.table, write)?;
                state.upsert(&self.table, write);
                Ok(())
            }

            WritePlan::Transactional => {
                let mut state = self.store.state.lock().await;
                state.check_upsert(&self.table, write)?;
                state.append(&write.events)?;
                state.upsert(&self.table, write);
                Ok(())
            }

            WritePlan::AppendThenAssert => {
                self.store.state.lock().await.append(&write.events)?;

                let state = self.store.state.lock().await;
                match state.tables.get(&self.table).and_then(|d| d.get(&write.id)) {
                    None => Err(StoreError::NotFound(write.id.clone())),
                    Some(doc) if doc.version != write.loaded => Err(write.conflict()),
                    Some(_) => Ok(()),
                }
            }
        }
    }
}

#[async_trait]
impl AggregateWriter for InMemoryAggregateStore {
    async fn save<A: Aggregate>(&self, aggregate: &mut A) -> Result<(), StoreError> {
        let write = PreparedWrite::from_aggregate(aggregate)?;

        let result = self.execute(&write).await;

        if let Err(e) = &result {
            if e.is_conflict() {
                if let Some(metrics) = &self.metrics {
                    metrics.record_save_conflict(&self.table);
                }
            }
            tracing::debug!(
                table = %self.table,
                aggregate_id = %write.id,
                plan = ?write.plan,
                error = %e,
                "In-memory save rejected"
            );
        }

        result
    }

    async fn load<S>(&self, id: &str) -> Result<StoredSnapshot<S>, StoreError>
    where
        S: DeserializeOwned + Send,
    {
        let state = self.store.state.lock().await;

        let doc = state
            .tables
            .get(&self.table)
            .and_then(|docs| docs.get(id))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        Ok(StoredSnapshot {
            id: id.to_string(),
            version: Version::restore(doc.version),
            snapshot: serde_json::from_value(doc.snapshot.clone())?,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
