use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgDatabaseError, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};

use crate::event_sourcing::core::{Event, OutboxRecord};
use crate::utils::Clock;

use super::error::StoreError;
use super::traits::OutboxStorage;
use super::write_plan::repeated_id;

const UNIQUE_VIOLATION: &str = "23505";

// ============================================================================
// Postgres Outbox
// ============================================================================
//
// Table `outbox_events`. A row is pending while `published_at` is NULL.
// Published rows are kept for audit and never returned by `get_pending`.
//
// ============================================================================

#[derive(Clone)]
pub struct PgOutbox {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgOutbox {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

/// Inserts events on an existing connection, so callers can run it inside
/// their own transaction. An id already stored, or repeated in the batch,
/// is a `DuplicateEvent` and nothing is inserted.
pub(crate) async fn insert_events(
    conn: &mut PgConnection,
    events: &[Event],
) -> Result<(), StoreError> {
    if events.is_empty() {
        return Ok(());
    }

    if let Some(id) = repeated_id(events) {
        return Err(StoreError::DuplicateEvent(id.to_string()));
    }

    let rows = events
        .iter()
        .map(|event| Ok((event, serde_json::from_slice::<Value>(event.payload())?)))
        .collect::<Result<Vec<_>, StoreError>>()?;

    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO outbox_events (id, created_at, topic, payload) ");
    builder.push_values(rows, |mut row, (event, payload)| {
        row.push_bind(event.id())
            .push_bind(event.created_at())
            .push_bind(event.topic())
            .push_bind(payload);
    });

    builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| duplicate_or_database(e, events))?;

    tracing::debug!(count = events.len(), "Events appended to outbox");
    Ok(())
}

fn duplicate_or_database(error: sqlx::Error, events: &[Event]) -> StoreError {
    let db = match &error {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => db,
        _ => return error.into(),
    };

    // detail reads "Key (id)=(evt-1) already exists."
    let id = db
        .try_downcast_ref::<PgDatabaseError>()
        .and_then(|pg| pg.detail())
        .and_then(key_from_detail)
        .or_else(|| events.first().map(|e| e.id().to_string()))
        .unwrap_or_default();

    StoreError::DuplicateEvent(id)
}

fn key_from_detail(detail: &str) -> Option<String> {
    let (_, rest) = detail.split_once(")=(")?;
    let (key, _) = rest.rsplit_once(") already exists")?;
    Some(key.to_string())
}

fn event_from_row(row: &PgRow) -> Result<Event, StoreError> {
    let id: String = row.try_get("id")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let topic: String = row.try_get("topic")?;
    let payload: Value = row.try_get("payload")?;

    Ok(Event::restore(id, created_at, topic, serde_json::to_vec(&payload)?))
}

#[async_trait]
impl OutboxStorage for PgOutbox {
    async fn save(&self, events: &[Event]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await?;
        insert_events(&mut conn, events).await
    }

    async fn get_pending(&self) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, created_at, topic, payload FROM outbox_events \
             WHERE published_at IS NULL ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn mark_as_published(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_events SET published_at = $2 \
             WHERE id = $1 AND published_at IS NULL",
        )
        .bind(id)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<OutboxRecord, StoreError> {
        let row = sqlx::query(
            "SELECT id, created_at, topic, payload, published_at FROM outbox_events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        Ok(OutboxRecord {
            event: event_from_row(&row)?,
            published_at: row.try_get("published_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_unique_violation_detail() {
        assert_eq!(
            key_from_detail("Key (id)=(evt-1) already exists.").as_deref(),
            Some("evt-1")
        );
        assert_eq!(
            key_from_detail("Key (id)=(a)=(b) already exists.").as_deref(),
            Some("a)=(b")
        );
        assert_eq!(key_from_detail("something else"), None);
    }

    #[test]
    fn test_other_database_errors_pass_through() {
        let err = duplicate_or_database(sqlx::Error::PoolTimedOut, &[]);
        assert!(matches!(err, StoreError::Database(sqlx::Error::PoolTimedOut)));
    }
}
