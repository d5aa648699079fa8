use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::event_sourcing::core::{Event, PAYLOAD_CONTENT_TYPE};
use crate::messaging::error::BrokerError;
use crate::messaging::routing::{validate_listener, HandlerTable};
use crate::messaging::traits::{HandlerPair, Listener, Publisher};

use super::client::{OutgoingMessage, RabbitMqClient};

/// Publisher and Listener over a RabbitMQ topic exchange.
#[derive(Clone)]
pub struct RabbitMqBroker {
    client: Arc<RabbitMqClient>,
    consumers: usize,
}

impl RabbitMqBroker {
    pub fn new(client: Arc<RabbitMqClient>, consumers: usize) -> Self {
        Self {
            client,
            consumers: consumers.max(1),
        }
    }

    pub fn client(&self) -> &Arc<RabbitMqClient> {
        &self.client
    }
}

#[async_trait]
impl Publisher for RabbitMqBroker {
    async fn publish(&self, event: &Event) -> Result<(), BrokerError> {
        self.client
            .publish(OutgoingMessage {
                routing_key: event.topic(),
                content_type: PAYLOAD_CONTENT_TYPE,
                message_id: event.id(),
                timestamp: event.created_at(),
                body: event.payload(),
            })
            .await
    }
}

#[async_trait]
impl Listener for RabbitMqBroker {
    async fn listen(
        &self,
        cancel: CancellationToken,
        identifier: &str,
        routing_keys: &[&str],
        handlers: Vec<HandlerPair>,
    ) -> Result<(), BrokerError> {
        validate_listener(identifier, routing_keys, &handlers)?;

        let readiness = self.client.stream(
            cancel.clone(),
            identifier,
            routing_keys,
            HandlerTable::new(handlers),
            self.consumers,
        );

        match await_readiness(&cancel, readiness).await {
            Readiness::Cancelled => {
                tracing::info!(listener = %identifier, "Listener cancelled before all consumers were ready");
            }
            Readiness::Ready { ready, total } if ready == total => {
                tracing::info!(
                    listener = %identifier,
                    consumers = total,
                    routing_keys = ?routing_keys,
                    "✅ All consumers ready"
                );
            }
            Readiness::Ready { ready, total } => {
                tracing::warn!(
                    listener = %identifier,
                    ready,
                    consumers = total,
                    "Some consumers stopped before becoming ready"
                );
            }
        }

        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Readiness {
    Cancelled,
    Ready { ready: usize, total: usize },
}

/// A worker that exits before streaming drops its sender, so it counts as
/// not ready rather than blocking the wait.
async fn await_readiness(
    cancel: &CancellationToken,
    readiness: Vec<oneshot::Receiver<()>>,
) -> Readiness {
    let total = readiness.len();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Readiness::Cancelled,
        results = join_all(readiness) => Readiness::Ready {
            ready: results.iter().filter(|r| r.is_ok()).count(),
            total,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readiness_counts_consumers_that_reported() {
        let cancel = CancellationToken::new();
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel::<()>();

        first_tx.send(()).unwrap();
        drop(second_tx);

        assert_eq!(
            await_readiness(&cancel, vec![first_rx, second_rx]).await,
            Readiness::Ready { ready: 1, total: 2 }
        );
    }

    #[tokio::test]
    async fn test_readiness_prefers_cancellation() {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        ready_tx.send(()).unwrap();
        cancel.cancel();

        assert_eq!(
            await_readiness(&cancel, vec![ready_rx]).await,
            Readiness::Cancelled
        );
    }

    #[tokio::test]
    async fn test_readiness_waits_for_every_consumer() {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let waiting = tokio::spawn({
            let cancel = cancel.clone();
            async move { await_readiness(&cancel, vec![ready_rx]).await }
        });

        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        ready_tx.send(()).unwrap();
        assert_eq!(
            waiting.await.unwrap(),
            Readiness::Ready { ready: 1, total: 1 }
        );
    }
}
