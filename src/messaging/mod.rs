// ============================================================================
// Messaging - Publishers, Listeners and Their Transports
// ============================================================================

pub mod error;
pub mod local_broker;
pub mod rabbitmq;
pub mod routing;
pub mod traits;

pub use error::BrokerError;
pub use local_broker::{LocalBroker, Subscription};
pub use rabbitmq::{RabbitMqBroker, RabbitMqClient};
pub use routing::{dispatch, topic_matches, DeliveryOutcome, HandlerTable};
pub use traits::{handler, typed_handler, Handler, HandlerPair, Listener, Publisher};
