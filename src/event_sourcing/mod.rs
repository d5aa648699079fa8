// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic persistence for aggregates and their outbox.
// Domain-specific code is in src/domain/
//
// ============================================================================

pub mod core;
pub mod store;

pub use self::core::*;
pub use self::store::*;
