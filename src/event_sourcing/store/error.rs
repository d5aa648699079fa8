use crate::utils::IsTransient;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("version conflict on {id}: expected stored version {expected}")]
    Conflict { id: String, expected: i64 },

    #[error("not found: {0}")]
    NotFound(String),

    /// An outbox id already stored, or repeated within one batch.
    #[error("duplicate event id {0}")]
    DuplicateEvent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_duplicate_event(&self) -> bool {
        matches!(self, Self::DuplicateEvent(_))
    }
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Io(_))
            | Self::Database(sqlx::Error::PoolTimedOut)
            | Self::Database(sqlx::Error::WorkerCrashed) => true,
            // serialization_failure, deadlock_detected
            Self::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }
}
