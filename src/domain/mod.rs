// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Aggregates built on the persistence contract in `event_sourcing`. The
// infrastructure never depends on anything in here.
//
// ============================================================================

pub mod order;
