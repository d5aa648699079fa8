// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// Value types shared by every aggregate and every store. No I/O here.
//
// ============================================================================

pub mod aggregate;
pub mod buffer;
pub mod event;
pub mod version;

pub use aggregate::{Aggregate, OutboxRecord, StoredSnapshot};
pub use buffer::EventBuffer;
pub use event::{Event, EventError, Payload, PAYLOAD_CONTENT_TYPE};
pub use version::{Version, NEVER_STORED};
