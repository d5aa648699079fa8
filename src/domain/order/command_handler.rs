use std::sync::Arc;

use anyhow::{Context, Result};

use crate::event_sourcing::core::Aggregate;
use crate::event_sourcing::store::AggregateWriter;
use crate::utils::{Clock, IdGenerator};

use super::aggregate::{Order, OrderSnapshot};
use super::commands::OrderCommand;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → Aggregate → Snapshot + Events → Store
//
// A stale load surfaces as `StoreError::Conflict` inside the returned error;
// callers reload and retry if they want to.
//
// ============================================================================

pub struct OrderCommandHandler<W> {
    store: Arc<W>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl<W: AggregateWriter> OrderCommandHandler<W> {
    pub fn new(store: Arc<W>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, clock, ids }
    }

    /// Handle a command and persist the resulting state and events.
    /// Returns the version the order was saved at.
    pub async fn handle(&self, order_id: &str, command: OrderCommand) -> Result<i64> {
        let name = command.name();

        let mut order = match command {
            OrderCommand::CreateOrder { customer_id, items } => Order::create(
                self.clock.as_ref(),
                self.ids.as_ref(),
                order_id,
                customer_id,
                items,
            )?,
            command => {
                let stored = self
                    .store
                    .load::<OrderSnapshot>(order_id)
                    .await
                    .with_context(|| format!("Failed to load order {order_id}"))?;

                let mut order = Order::from_snapshot(stored);
                order.handle(self.clock.as_ref(), self.ids.as_ref(), command)?;
                order
            }
        };

        let version = order.version().current();
        let events = order.pending_events();

        self.store
            .save(&mut order)
            .await
            .with_context(|| format!("Failed to save order {order_id} after {name}"))?;

        tracing::info!(
            aggregate_id = %order_id,
            command = name,
            version,
            events,
            "✅ Order command handled"
        );

        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderItem, OrderStatus, ORDERS_TABLE};
    use crate::event_sourcing::store::{InMemoryStore, OutboxStorage, StoreError};
    use crate::utils::{SequentialIdGenerator, SystemClock};

    fn setup() -> (InMemoryStore, OrderCommandHandler<crate::event_sourcing::store::InMemoryAggregateStore>) {
        let store = InMemoryStore::new(Arc::new(SystemClock));
        let handler = OrderCommandHandler::new(
            Arc::new(store.collection(ORDERS_TABLE)),
            Arc::new(SystemClock),
            Arc::new(SequentialIdGenerator::new("evt")),
        );
        (store, handler)
    }

    fn create() -> OrderCommand {
        OrderCommand::CreateOrder {
            customer_id: "customer-1".to_string(),
            items: vec![OrderItem::new("sku-1", 1)],
        }
    }

    #[tokio::test]
    async fn test_create_then_confirm() {
        let (store, handler) = setup();

        assert_eq!(handler.handle("order-1", create()).await.unwrap(), 0);
        assert_eq!(
            handler.handle("order-1", OrderCommand::ConfirmOrder).await.unwrap(),
            1
        );

        let stored = store
            .collection(ORDERS_TABLE)
            .load::<OrderSnapshot>("order-1")
            .await
            .unwrap();
        assert_eq!(stored.version.current(), 1);
        assert_eq!(stored.snapshot.status, OrderStatus::Confirmed);

        let topics: Vec<_> = store
            .get_pending()
            .await
            .unwrap()
            .iter()
            .map(|e| e.topic().to_string())
            .collect();
        assert_eq!(topics, vec!["orders.created", "orders.confirmed"]);
    }

    #[tokio::test]
    async fn test_creating_twice_conflicts() {
        let (_store, handler) = setup();

        handler.handle("order-1", create()).await.unwrap();
        let err = handler.handle("order-1", create()).await.unwrap_err();

        let store_error = err.downcast_ref::<StoreError>().unwrap();
        assert!(store_error.is_conflict());
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let (_store, handler) = setup();

        let err = handler
            .handle("missing", OrderCommand::ConfirmOrder)
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<StoreError>().unwrap().is_not_found());
    }
}
