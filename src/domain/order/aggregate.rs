use serde::{Deserialize, Serialize};

use crate::event_sourcing::core::{Aggregate, Event, EventBuffer, Payload, StoredSnapshot, Version};
use crate::utils::{Clock, IdGenerator};

use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::*;
use super::value_objects::{OrderItem, OrderStatus};

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// State changes bump the version once per unit of work and stage the event
// describing them. `NotifyCustomer` stages an event without touching state,
// so its save only appends to the outbox and asserts the version.
//
// ============================================================================

/// Table holding order snapshots.
pub const ORDERS_TABLE: &str = "orders";

/// Persisted form of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: String,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub cancelled_reason: Option<String>,
}

#[derive(Debug)]
pub struct Order {
    state: OrderSnapshot,
    version: Version,
    events: EventBuffer,
}

impl Order {
    /// Starts a new order and stages `orders.created`.
    pub fn create(
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
        id: impl Into<String>,
        customer_id: impl Into<String>,
        items: Vec<OrderItem>,
    ) -> Result<Self, OrderError> {
        validate_items(&items)?;

        let state = OrderSnapshot {
            id: id.into(),
            customer_id: customer_id.into(),
            items,
            status: OrderStatus::Created,
            tracking_number: None,
            carrier: None,
            cancelled_reason: None,
        };

        let created = OrderCreated {
            order_id: state.id.clone(),
            customer_id: state.customer_id.clone(),
            items: state.items.clone(),
        };

        let mut order = Self {
            state,
            version: Version::new(),
            events: EventBuffer::new(),
        };
        order.raise(clock, ids, &created)?;

        Ok(order)
    }

    /// Rebuilds an order from its stored snapshot.
    pub fn from_snapshot(stored: StoredSnapshot<OrderSnapshot>) -> Self {
        Self {
            state: stored.snapshot,
            version: stored.version,
            events: EventBuffer::new(),
        }
    }

    /// Applies a command to an existing order.
    pub fn handle(
        &mut self,
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
        command: OrderCommand,
    ) -> Result<(), OrderError> {
        match command {
            OrderCommand::CreateOrder { .. } => Err(OrderError::AlreadyExists(self.state.id.clone())),
            OrderCommand::ConfirmOrder => self.confirm(clock, ids),
            OrderCommand::ShipOrder {
                tracking_number,
                carrier,
            } => self.ship(clock, ids, tracking_number, carrier),
            OrderCommand::CancelOrder { reason } => self.cancel(clock, ids, reason),
            OrderCommand::NotifyCustomer { message } => self.notify_customer(clock, ids, message),
        }
    }

    pub fn confirm(&mut self, clock: &dyn Clock, ids: &dyn IdGenerator) -> Result<(), OrderError> {
        match self.state.status {
            OrderStatus::Created => {}
            OrderStatus::Confirmed => return Err(OrderError::AlreadyConfirmed),
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
            status => return Err(OrderError::InvalidStatusTransition(status)),
        }

        self.raise(
            clock,
            ids,
            &OrderConfirmed {
                order_id: self.state.id.clone(),
            },
        )?;

        self.state.status = OrderStatus::Confirmed;
        self.version.record_modification();
        Ok(())
    }

    pub fn ship(
        &mut self,
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
        tracking_number: String,
        carrier: String,
    ) -> Result<(), OrderError> {
        match self.state.status {
            OrderStatus::Confirmed => {}
            OrderStatus::Created => return Err(OrderError::NotConfirmed),
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
            status => return Err(OrderError::InvalidStatusTransition(status)),
        }

        self.raise(
            clock,
            ids,
            &OrderShipped {
                order_id: self.state.id.clone(),
                tracking_number: tracking_number.clone(),
                carrier: carrier.clone(),
            },
        )?;

        self.state.status = OrderStatus::Shipped;
        self.state.tracking_number = Some(tracking_number);
        self.state.carrier = Some(carrier);
        self.version.record_modification();
        Ok(())
    }

    pub fn cancel(
        &mut self,
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
        reason: Option<String>,
    ) -> Result<(), OrderError> {
        match self.state.status {
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
            OrderStatus::Shipped => {
                return Err(OrderError::InvalidStatusTransition(OrderStatus::Shipped))
            }
            _ => {}
        }

        self.raise(
            clock,
            ids,
            &OrderCancelled {
                order_id: self.state.id.clone(),
                reason: reason.clone(),
            },
        )?;

        self.state.status = OrderStatus::Cancelled;
        self.state.cancelled_reason = reason;
        self.version.record_modification();
        Ok(())
    }

    /// Stages an informational event; the order itself is left untouched.
    pub fn notify_customer(
        &mut self,
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
        message: String,
    ) -> Result<(), OrderError> {
        let notified = CustomerNotified {
            order_id: self.state.id.clone(),
            message,
        };
        self.raise(clock, ids, &notified)
    }

    pub fn customer_id(&self) -> &str {
        &self.state.customer_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.state.items
    }

    pub fn status(&self) -> OrderStatus {
        self.state.status
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.state.tracking_number.as_deref()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    fn raise<P: Payload>(
        &mut self,
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
        payload: &P,
    ) -> Result<(), OrderError> {
        let event = Event::new(clock, ids, payload)?;
        self.events.add(event);
        Ok(())
    }
}

fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::EmptyItems);
    }

    for item in items {
        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity(item.quantity));
        }
    }

    Ok(())
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for Order {
    type Snapshot = OrderSnapshot;

    fn id(&self) -> &str {
        &self.state.id
    }

    fn version(&self) -> &Version {
        &self.version
    }

    fn take_snapshot(&self) -> Self::Snapshot {
        self.state.clone()
    }

    fn events(&mut self) -> &mut EventBuffer {
        &mut self.events
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{SequentialIdGenerator, SystemClock};

    fn new_order(ids: &SequentialIdGenerator) -> Order {
        Order::create(
            &SystemClock,
            ids,
            "order-1",
            "customer-1",
            vec![OrderItem::new("sku-1", 2)],
        )
        .unwrap()
    }

    fn stored(order: &Order, version: i64) -> Order {
        Order::from_snapshot(StoredSnapshot {
            id: order.id().to_string(),
            version: Version::restore(version),
            snapshot: order.take_snapshot(),
        })
    }

    #[test]
    fn test_create_stages_created_event() {
        let ids = SequentialIdGenerator::new("evt");
        let mut order = new_order(&ids);

        assert_eq!(order.status(), OrderStatus::Created);
        assert!(order.version().is_new());

        let events = order.events().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic(), ORDER_CREATED);
        assert_eq!(events[0].id(), "evt-1");

        let payload: OrderCreated = events[0].decode().unwrap();
        assert_eq!(payload.order_id, "order-1");
        assert_eq!(payload.items, vec![OrderItem::new("sku-1", 2)]);
    }

    #[test]
    fn test_create_rejects_invalid_items() {
        let ids = SequentialIdGenerator::new("evt");

        let empty = Order::create(&SystemClock, &ids, "o", "c", vec![]);
        assert!(matches!(empty, Err(OrderError::EmptyItems)));

        let zero = Order::create(&SystemClock, &ids, "o", "c", vec![OrderItem::new("sku", 0)]);
        assert!(matches!(zero, Err(OrderError::InvalidQuantity(0))));
    }

    #[test]
    fn test_confirm_bumps_version_once() {
        let ids = SequentialIdGenerator::new("evt");
        let mut order = stored(&new_order(&ids), 3);

        order.confirm(&SystemClock, &ids).unwrap();
        order
            .ship(&SystemClock, &ids, "TRK-1".to_string(), "DHL".to_string())
            .unwrap();

        assert_eq!(order.version().current(), 4);
        assert_eq!(order.version().loaded(), 3);
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert_eq!(order.tracking_number(), Some("TRK-1"));
        assert_eq!(order.pending_events(), 2);
    }

    #[test]
    fn test_notify_customer_leaves_state_unmodified() {
        let ids = SequentialIdGenerator::new("evt");
        let mut order = stored(&new_order(&ids), 1);

        order
            .handle(
                &SystemClock,
                &ids,
                OrderCommand::NotifyCustomer {
                    message: "on its way".to_string(),
                },
            )
            .unwrap();

        assert!(!order.version().modified());
        assert_eq!(order.pending_events(), 1);
    }

    #[test]
    fn test_status_rules() {
        let ids = SequentialIdGenerator::new("evt");
        let mut order = stored(&new_order(&ids), 1);

        assert!(matches!(
            order.ship(&SystemClock, &ids, "TRK".to_string(), "UPS".to_string()),
            Err(OrderError::NotConfirmed)
        ));

        order.cancel(&SystemClock, &ids, Some("changed mind".to_string())).unwrap();

        assert!(matches!(
            order.confirm(&SystemClock, &ids),
            Err(OrderError::AlreadyCancelled)
        ));
        assert!(matches!(
            order.cancel(&SystemClock, &ids, None),
            Err(OrderError::AlreadyCancelled)
        ));
        assert!(matches!(
            order.handle(
                &SystemClock,
                &ids,
                OrderCommand::CreateOrder {
                    customer_id: "c".to_string(),
                    items: vec![],
                }
            ),
            Err(OrderError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_invalid_payload_leaves_order_untouched() {
        let ids = SequentialIdGenerator::new("evt");
        let mut order = stored(&new_order(&ids), 1);
        order.confirm(&SystemClock, &ids).unwrap();
        let before = order.pending_events();

        let result = order.ship(&SystemClock, &ids, String::new(), "UPS".to_string());

        assert!(matches!(result, Err(OrderError::Event(_))));
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.pending_events(), before);
    }
}
