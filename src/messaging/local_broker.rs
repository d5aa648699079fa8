use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::event_sourcing::core::Event;
use crate::metrics::Metrics;

use super::error::BrokerError;
use super::routing::{dispatch, topic_matches, validate_listener, HandlerTable};
use super::traits::{HandlerPair, Listener, Publisher};

// ============================================================================
// Local Broker - In-Process Publisher / Listener
// ============================================================================
//
// Each subscriber owns an unbounded queue drained by its own task, so a
// slow subscriber never holds up `publish` or the other subscribers.
// Routing keys are matched with the same patterns as the AMQP exchange.
//
// There is no redelivery: a failed handler is logged and the event dropped.
// `close` also ends the tasks that unsubscribe listeners on cancellation.
//
// ============================================================================

struct Subscriber {
    id: u64,
    identifier: String,
    routing_keys: Vec<String>,
    sender: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
struct Inner {
    subscribers: Vec<Subscriber>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

#[derive(Clone, Default)]
pub struct LocalBroker {
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
    metrics: Option<Arc<Metrics>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn subscribe(
        &self,
        identifier: &str,
        routing_keys: &[&str],
        handlers: Vec<HandlerPair>,
    ) -> Result<Subscription, BrokerError> {
        validate_listener(identifier, routing_keys, &handlers)?;

        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(BrokerError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        inner.subscribers.push(Subscriber {
            id,
            identifier: identifier.to_string(),
            routing_keys: routing_keys.iter().map(|k| k.to_string()).collect(),
            sender,
        });

        let task = tokio::spawn(run_subscriber(
            identifier.to_string(),
            receiver,
            HandlerTable::new(handlers),
            self.metrics.clone(),
        ));
        inner.tasks.retain(|t| !t.is_finished());
        inner.tasks.push(task);

        tracing::debug!(
            identifier = %identifier,
            routing_keys = ?routing_keys,
            subscription = id,
            "Subscribed to topics"
        );

        Ok(Subscription(id))
    }

    /// Stops routing to the subscriber. Events already queued are still
    /// handled.
    pub async fn unsubscribe(&self, subscription: Subscription) {
        let mut inner = self.inner.lock().await;
        inner.subscribers.retain(|s| s.id != subscription.0);
    }

    /// Rejects further publishes, lets every subscriber drain its queue and
    /// waits for them to finish.
    pub async fn close(&self) {
        let tasks = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.subscribers.clear();
            std::mem::take(&mut inner.tasks)
        };
        self.shutdown.cancel();

        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Local subscriber task failed");
            }
        }

        tracing::info!("Local broker closed");
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }
}

async fn run_subscriber(
    identifier: String,
    mut receiver: mpsc::UnboundedReceiver<Event>,
    table: HandlerTable,
    metrics: Option<Arc<Metrics>>,
) {
    while let Some(event) = receiver.recv().await {
        tracing::debug!(
            identifier = %identifier,
            event_id = %event.id(),
            topic = %event.topic(),
            "Handling event"
        );

        let outcome = dispatch(&table, event).await;
        if let Some(metrics) = &metrics {
            metrics.record_delivery(&identifier, outcome.as_str());
        }
    }

    tracing::debug!(identifier = %identifier, "Local subscriber stopped");
}

#[async_trait]
impl Publisher for LocalBroker {
    async fn publish(&self, event: &Event) -> Result<(), BrokerError> {
        let inner = self.inner.lock().await;
        if inner.closed {
            return Err(BrokerError::Closed);
        }

        for subscriber in &inner.subscribers {
            if !subscriber
                .routing_keys
                .iter()
                .any(|key| topic_matches(key, event.topic()))
            {
                continue;
            }

            tracing::debug!(
                topic = %event.topic(),
                event_id = %event.id(),
                identifier = %subscriber.identifier,
                "Sending event"
            );

            // The receiver only goes away once the subscriber is removed.
            let _ = subscriber.sender.send(event.clone());
        }

        Ok(())
    }
}

#[async_trait]
impl Listener for LocalBroker {
    async fn listen(
        &self,
        cancel: CancellationToken,
        identifier: &str,
        routing_keys: &[&str],
        handlers: Vec<HandlerPair>,
    ) -> Result<(), BrokerError> {
        let subscription = self.subscribe(identifier, routing_keys, handlers).await?;

        let broker = self.clone();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = broker.shutdown.cancelled() => {}
                _ = cancel.cancelled() => broker.unsubscribe(subscription).await,
            }
        });

        let mut inner = self.inner.lock().await;
        inner.tasks.retain(|t| !t.is_finished());
        inner.tasks.push(watcher);

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
