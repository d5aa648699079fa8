// ============================================================================
// Event Sourcing Store - Persistence Layer
// ============================================================================
//
// Contracts (`AggregateWriter`, `OutboxStorage`) with a Postgres and an
// in-memory implementation. Both run the same `WritePlan`.
//
// ============================================================================

pub mod error;
pub mod in_memory;
pub mod pg_aggregate_store;
pub mod pg_outbox;
pub mod schema;
pub mod traits;
pub mod write_plan;

pub use error::StoreError;
pub use in_memory::{InMemoryAggregateStore, InMemoryStore};
pub use pg_aggregate_store::PgAggregateStore;
pub use pg_outbox::PgOutbox;
pub use schema::ensure_schema;
pub use traits::{AggregateWriter, OutboxStorage};
pub use write_plan::{PreparedWrite, WritePlan};
