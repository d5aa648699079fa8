// ============================================================================
// Order Domain - Example Aggregate on the Outbox Contract
// ============================================================================
//
// - Value objects (OrderItem, OrderStatus)
// - Events (OrderCreated, OrderConfirmed, etc.) with their routing keys
// - Commands (CreateOrder, ConfirmOrder, etc.)
// - Errors (OrderError enum)
// - Aggregate (Order, persisted as an OrderSnapshot)
// - Command Handler (OrderCommandHandler)
//
// ============================================================================

pub mod aggregate;
pub mod command_handler;
pub mod commands;
pub mod errors;
pub mod events;
pub mod value_objects;

pub use aggregate::{Order, OrderSnapshot, ORDERS_TABLE};
pub use command_handler::OrderCommandHandler;
pub use commands::OrderCommand;
pub use errors::OrderError;
pub use events::*;
pub use value_objects::{OrderItem, OrderStatus};
