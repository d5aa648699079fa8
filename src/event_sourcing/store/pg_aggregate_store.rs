use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Row};

use crate::event_sourcing::core::{Aggregate, StoredSnapshot, Version};
use crate::metrics::Metrics;

use super::error::StoreError;
use super::pg_outbox::insert_events;
use super::schema::validate_table_name;
use super::traits::AggregateWriter;
use super::write_plan::{PreparedWrite, WritePlan};

// ============================================================================
// Postgres Aggregate Store
// ============================================================================
//
// One table per aggregate kind: (id, version, snapshot, updated_at).
// Events go to `outbox_events` on the same pool, so the transactional plan
// commits both in one round.
//
// ============================================================================

#[derive(Clone)]
pub struct PgAggregateStore {
    pool: PgPool,
    table: String,
    metrics: Option<Arc<Metrics>>,
}

impl PgAggregateStore {
    pub fn new(pool: PgPool, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;

        Ok(Self {
            pool,
            table: table.to_string(),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Conditional replace, falling back to insert. A stale writer ends up
    /// on the insert and trips the primary key.
    async fn upsert(
        &self,
        conn: &mut PgConnection,
        write: &PreparedWrite,
    ) -> Result<(), StoreError> {
        let update = format!(
            "UPDATE {} SET version = $2, snapshot = $3, updated_at = now() \
             WHERE id = $1 AND version = $4",
            self.table
        );
        let updated = sqlx::query(&update)
            .bind(&write.id)
            .bind(write.current)
            .bind(&write.snapshot)
            .bind(write.loaded)
            .execute(&mut *conn)
            .await?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let insert = format!(
            "INSERT INTO {} (id, version, snapshot, updated_at) VALUES ($1, $2, $3, now())",
            self.table
        );
        sqlx::query(&insert)
            .bind(&write.id)
            .bind(write.current)
            .bind(&write.snapshot)
            .execute(&mut *conn)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => write.conflict(),
                other => StoreError::Database(other),
            })?;

        Ok(())
    }

    async fn assert_version(
        &self,
        conn: &mut PgConnection,
        write: &PreparedWrite,
    ) -> Result<(), StoreError> {
        let select = format!("SELECT version FROM {} WHERE id = $1", self.table);
        let stored: Option<i64> = sqlx::query_scalar(&select)
            .bind(&write.id)
            .fetch_optional(&mut *conn)
            .await?;

        match stored {
            None => Err(StoreError::NotFound(write.id.clone())),
            Some(version) if version != write.loaded => Err(write.conflict()),
            Some(_) => Ok(()),
        }
    }

    async fn execute(&self, write: &PreparedWrite) -> Result<(), StoreError> {
        match write.plan {
            WritePlan::Noop => Ok(()),

            WritePlan::UpsertOnly => {
                let mut conn = self.pool.acquire().await?;
                self.upsert(&mut conn, write).await
            }

            WritePlan::Transactional => {
                let mut tx = self.pool.begin().await?;
                self.upsert(&mut tx, write).await?;
                insert_events(&mut tx, &write.events).await?;
                tx.commit().await?;
                Ok(())
            }

            WritePlan::AppendThenAssert => {
                let mut conn = self.pool.acquire().await?;
                insert_events(&mut conn, &write.events).await?;
                self.assert_version(&mut conn, write).await
            }
        }
    }
}

#[async_trait]
impl AggregateWriter for PgAggregateStore {
    async fn save<A: Aggregate>(&self, aggregate: &mut A) -> Result<(), StoreError> {
        let write = PreparedWrite::from_aggregate(aggregate)?;

        let result = self.execute(&write).await;

        match &result {
            Ok(()) if write.plan != WritePlan::Noop => tracing::debug!(
                table = %self.table,
                aggregate_id = %write.id,
                version = write.current,
                events = write.events.len(),
                plan = ?write.plan,
                "Aggregate saved"
            ),
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_save_conflict(&self.table);
                }
                tracing::warn!(
                    table = %self.table,
                    aggregate_id = %write.id,
                    expected = write.loaded,
                    plan = ?write.plan,
                    "Version conflict"
                );
            }
            Err(e) => tracing::error!(
                table = %self.table,
                aggregate_id = %write.id,
                error = %e,
                "Failed to save aggregate"
            ),
        }

        result
    }

    async fn load<S>(&self, id: &str) -> Result<StoredSnapshot<S>, StoreError>
    where
        S: DeserializeOwned + Send,
    {
        let select = format!("SELECT version, snapshot FROM {} WHERE id = $1", self.table);
        let row = sqlx::query(&select)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let version: i64 = row.try_get("version")?;
        let snapshot: Value = row.try_get("snapshot")?;

        Ok(StoredSnapshot {
            id: id.to_string(),
            version: Version::restore(version),
            snapshot: serde_json::from_value(snapshot)?,
        })
    }
}
