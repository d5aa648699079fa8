use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::OutboxConfig;
use crate::event_sourcing::store::{OutboxStorage, StoreError};
use crate::messaging::Publisher;
use crate::metrics::Metrics;

use super::repeater::{Repeater, RepeaterConfig};

// ============================================================================
// Outbox Poller
// ============================================================================
//
// Each tick:
// 1. Read every pending event
// 2. Publish them one by one
// 3. Mark an event as published only after its publish succeeded
//
// A failed publish leaves the event pending for the next tick. A failed mark
// is logged: the event stays pending and will be published again, which
// consumers must tolerate (at-least-once).
//
// ============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub pending: usize,
    pub published: usize,
    pub publish_failures: usize,
    pub mark_failures: usize,
}

pub struct Poller {
    storage: Arc<dyn OutboxStorage>,
    publisher: Arc<dyn Publisher>,
    repeater: Repeater,
    metrics: Option<Arc<Metrics>>,
}

impl Poller {
    pub fn new(
        storage: Arc<dyn OutboxStorage>,
        publisher: Arc<dyn Publisher>,
        config: &OutboxConfig,
    ) -> Self {
        Self {
            storage,
            publisher,
            repeater: Repeater::new("outbox_poller", RepeaterConfig::from(config)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs one tick. Only reading the pending set can fail as a whole.
    pub async fn poll_once(&self) -> Result<PollReport, StoreError> {
        let started = Instant::now();
        let events = self.storage.get_pending().await?;

        let mut report = PollReport {
            pending: events.len(),
            ..Default::default()
        };

        for event in &events {
            if let Err(e) = self.publisher.publish(event).await {
                report.publish_failures += 1;
                self.record_publish(event.topic(), false);
                tracing::warn!(
                    event_id = %event.id(),
                    topic = %event.topic(),
                    error = %e,
                    "Failed to publish event, leaving it pending"
                );
                continue;
            }

            self.record_publish(event.topic(), true);

            if let Err(e) = self.storage.mark_as_published(event.id()).await {
                report.mark_failures += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.record_mark_failure();
                }
                tracing::error!(
                    event_id = %event.id(),
                    topic = %event.topic(),
                    error = %e,
                    "Failed to mark event as published, it will be delivered again"
                );
                continue;
            }

            report.published += 1;
            tracing::debug!(event_id = %event.id(), topic = %event.topic(), "Event published");
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_poll(report.pending, started.elapsed().as_secs_f64());
        }

        Ok(report)
    }

    fn record_publish(&self, topic: &str, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_publish(topic, success);
        }
    }

    /// Polls on the configured schedule until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        self.repeater
            .run(cancel, move || async move {
                match self.poll_once().await {
                    Ok(report) if report.pending > 0 => tracing::info!(
                        pending = report.pending,
                        published = report.published,
                        publish_failures = report.publish_failures,
                        mark_failures = report.mark_failures,
                        "📤 Outbox poll complete"
                    ),
                    Ok(_) => tracing::trace!("Outbox empty"),
                    Err(e) => tracing::error!(error = %e, "Failed to read pending events"),
                }
            })
            .await;
    }
}

// ============================================================================
// Tests
// ============================================================================
