use sqlx::PgPool;

use super::error::StoreError;

// Tables are created if missing. Evolving them is left to the operator.

const CREATE_OUTBOX: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_events (
    id           TEXT PRIMARY KEY,
    created_at   TIMESTAMPTZ NOT NULL,
    topic        TEXT NOT NULL,
    payload      JSONB NOT NULL,
    published_at TIMESTAMPTZ NULL
)"#;

const CREATE_PENDING_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS outbox_events_pending_idx
    ON outbox_events (created_at)
    WHERE published_at IS NULL"#;

/// Table names are interpolated into SQL, so only `[a-z_][a-z0-9_]*` is
/// accepted.
pub fn validate_table_name(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_head = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_head && valid_tail && name.len() <= 63 {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Creates the outbox table and one snapshot table per aggregate kind.
pub async fn ensure_schema(pool: &PgPool, aggregate_tables: &[&str]) -> Result<(), StoreError> {
    sqlx::query(CREATE_OUTBOX).execute(pool).await?;
    sqlx::query(CREATE_PENDING_INDEX).execute(pool).await?;

    for table in aggregate_tables {
        validate_table_name(table)?;

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id         TEXT PRIMARY KEY,
                version    BIGINT NOT NULL,
                snapshot   JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        );
        sqlx::query(&ddl).execute(pool).await?;

        tracing::debug!(table = %table, "Aggregate table ready");
    }

    tracing::info!(tables = aggregate_tables.len(), "Schema ensured");
    Ok(())
}
