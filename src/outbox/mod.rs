// ============================================================================
// Outbox Relay - moves pending events from storage to a publisher
// ============================================================================

pub mod poller;
pub mod repeater;

pub use poller::{PollReport, Poller};
pub use repeater::{Repeater, RepeaterConfig};
