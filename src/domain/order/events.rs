use serde::{Deserialize, Serialize};

use crate::event_sourcing::core::Payload;
use super::value_objects::OrderItem;

// ============================================================================
// Order Events - Payloads Published Through the Outbox
// ============================================================================
//
// Routing keys follow `orders.<fact>`, so a consumer can bind `orders.*` to
// receive every order event or a single key for one of them.
//
// ============================================================================

pub const ORDER_CREATED: &str = "orders.created";
pub const ORDER_CONFIRMED: &str = "orders.confirmed";
pub const ORDER_SHIPPED: &str = "orders.shipped";
pub const ORDER_CANCELLED: &str = "orders.cancelled";
pub const CUSTOMER_NOTIFIED: &str = "orders.customer_notified";

/// Order Created - Initial event in order lifecycle
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OrderCreated {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
}

impl Payload for OrderCreated {
    fn topic(&self) -> &str {
        ORDER_CREATED
    }

    fn is_valid(&self) -> bool {
        !self.order_id.is_empty()
            && !self.items.is_empty()
            && self.items.iter().all(|item| item.quantity > 0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OrderConfirmed {
    pub order_id: String,
}

impl Payload for OrderConfirmed {
    fn topic(&self) -> &str {
        ORDER_CONFIRMED
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OrderShipped {
    pub order_id: String,
    pub tracking_number: String,
    pub carrier: String,
}

impl Payload for OrderShipped {
    fn topic(&self) -> &str {
        ORDER_SHIPPED
    }

    fn is_valid(&self) -> bool {
        !self.tracking_number.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OrderCancelled {
    pub order_id: String,
    pub reason: Option<String>,
}

impl Payload for OrderCancelled {
    fn topic(&self) -> &str {
        ORDER_CANCELLED
    }
}

/// Informational event; it does not change the order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CustomerNotified {
    pub order_id: String,
    pub message: String,
}

impl Payload for CustomerNotified {
    fn topic(&self) -> &str {
        CUSTOMER_NOTIFIED
    }
}
