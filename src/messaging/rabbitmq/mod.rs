// ============================================================================
// RabbitMQ Transport
// ============================================================================
//
// connection  one supervised AMQP connection, redialed on loss
// client      exchange declaration, confirmed publishing, worker spawning
// worker      one consumer per task, with its recovery state machine
// broker      Publisher / Listener over the client
//
// ============================================================================

pub mod broker;
pub mod client;
pub mod connection;
pub mod worker;

pub use broker::RabbitMqBroker;
pub use client::{OutgoingMessage, RabbitMqClient};
pub use connection::Connection;
pub use worker::{WorkerSignal, WorkerState};
