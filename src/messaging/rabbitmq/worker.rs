use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Consumer};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::event_sourcing::core::Event;
use crate::messaging::error::BrokerError;
use crate::messaging::routing::{dispatch, DeliveryOutcome, HandlerTable};
use crate::metrics::Metrics;

use super::connection::Connection;

// ============================================================================
// Consumer Worker
// ============================================================================
//
//   Starting ──channel opened──▶ Declaring ──subscribed──▶ Streaming
//       │                            │                     │  ▲  │
//       └──────── failed ────────────┴────▶ Recovering ◀───┘  │  └─ delivery
//                                            │   ▲  │         │
//                                            │   └──┘ failed   │
//                                            └── recovered ────┘
//
//   Streaming | Recovering ──cancelled──▶ Stopped (terminal)
//
// Cancellation is only observed while streaming or recovering, never in the
// middle of a declare.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Declaring,
    Streaming,
    Recovering,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    ChannelOpened,
    Subscribed,
    Delivery,
    Failed,
    Recovered,
    Cancelled,
}

impl WorkerState {
    /// Next state; signals that make no sense in a state leave it unchanged.
    pub fn on(self, signal: WorkerSignal) -> Self {
        use WorkerSignal::*;
        use WorkerState::*;

        match (self, signal) {
            (Stopped, _) => Stopped,
            (Starting, ChannelOpened) => Declaring,
            (Starting | Declaring, Failed) => Recovering,
            (Declaring, Subscribed) => Streaming,
            (Streaming, Delivery) => Streaming,
            (Streaming, Failed) => Recovering,
            (Recovering, Failed) => Recovering,
            (Recovering, Recovered) => Streaming,
            (Streaming | Recovering, Cancelled) => Stopped,
            (state, _) => state,
        }
    }
}

/// Everything a worker needs to consume one listener queue.
#[derive(Clone)]
pub struct WorkerContext {
    pub listener: String,
    pub queue: String,
    pub exchange: String,
    pub routing_keys: Vec<String>,
    pub connection: Arc<Connection>,
    pub table: Arc<HandlerTable>,
    pub retry_delay: Duration,
    pub cancel: CancellationToken,
    pub metrics: Option<Arc<Metrics>>,
}

pub struct Worker {
    index: usize,
    ctx: WorkerContext,
    ready: Option<oneshot::Sender<()>>,
    channel: Option<Channel>,
    consumer: Option<Consumer>,
    state: WorkerState,
}

impl Worker {
    pub fn new(index: usize, ctx: WorkerContext, ready: oneshot::Sender<()>) -> Self {
        Self {
            index,
            ctx,
            ready: Some(ready),
            channel: None,
            consumer: None,
            state: WorkerState::Starting,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!(listener = %self.ctx.listener, worker = self.index, "Consumer worker starting");

        while self.state != WorkerState::Stopped {
            let signal = self.step().await;
            let next = self.state.on(signal);

            if next != self.state {
                self.on_transition(next);
            }
            self.state = next;
        }

        self.close_channel().await;
        tracing::info!(listener = %self.ctx.listener, worker = self.index, "Consumer worker stopped");
    }

    async fn step(&mut self) -> WorkerSignal {
        match self.state {
            WorkerState::Starting => match self.ctx.connection.channel().await {
                Ok(channel) => {
                    self.channel = Some(channel);
                    WorkerSignal::ChannelOpened
                }
                Err(e) => {
                    tracing::warn!(worker = self.index, error = %e, "Failed to get channel");
                    WorkerSignal::Failed
                }
            },

            WorkerState::Declaring => match self.subscribe().await {
                Ok(()) => WorkerSignal::Subscribed,
                Err(e) => {
                    tracing::warn!(worker = self.index, error = %e, "Failed to subscribe");
                    self.close_channel().await;
                    WorkerSignal::Failed
                }
            },

            WorkerState::Streaming => self.next_delivery().await,

            WorkerState::Recovering => {
                tokio::select! {
                    biased;
                    _ = self.ctx.cancel.cancelled() => WorkerSignal::Cancelled,
                    _ = tokio::time::sleep(self.ctx.retry_delay) => self.recover().await,
                }
            }

            WorkerState::Stopped => WorkerSignal::Cancelled,
        }
    }

    fn on_transition(&mut self, next: WorkerState) {
        tracing::debug!(
            listener = %self.ctx.listener,
            worker = self.index,
            from = ?self.state,
            to = ?next,
            "Worker state changed"
        );

        if let Some(metrics) = &self.ctx.metrics {
            match (self.state, next) {
                (WorkerState::Streaming, _) => metrics.worker_stopped(&self.ctx.listener),
                (_, WorkerState::Streaming) => metrics.worker_started(&self.ctx.listener),
                _ => {}
            }
        }

        if next == WorkerState::Streaming {
            if let Some(ready) = self.ready.take() {
                let _ = ready.send(());
            }
        }
    }

    /// Declares the queue, binds every routing key and starts consuming.
    /// Both declare and bind are idempotent on the broker.
    async fn subscribe(&mut self) -> Result<(), BrokerError> {
        let channel = self.channel.as_ref().ok_or(BrokerError::Disconnected)?;

        channel
            .queue_declare(
                &self.ctx.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for routing_key in &self.ctx.routing_keys {
            channel
                .queue_bind(
                    &self.ctx.queue,
                    &self.ctx.exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        let consumer = channel
            .basic_consume(
                &self.ctx.queue,
                &format!("{}-{}", self.ctx.queue, self.index),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        self.consumer = Some(consumer);
        Ok(())
    }

    async fn recover(&mut self) -> WorkerSignal {
        let channel = match self.ctx.connection.channel().await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(worker = self.index, error = %e, "Still unable to get channel");
                return WorkerSignal::Failed;
            }
        };
        self.channel = Some(channel);

        match self.subscribe().await {
            Ok(()) => {
                tracing::info!(listener = %self.ctx.listener, worker = self.index, "Consumer recovered");
                WorkerSignal::Recovered
            }
            Err(e) => {
                tracing::warn!(worker = self.index, error = %e, "Failed to resubscribe");
                self.close_channel().await;
                WorkerSignal::Failed
            }
        }
    }

    async fn next_delivery(&mut self) -> WorkerSignal {
        let Some(consumer) = self.consumer.as_mut() else {
            return WorkerSignal::Failed;
        };

        let next = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => return WorkerSignal::Cancelled,
            next = consumer.next() => next,
        };

        match next {
            Some(Ok(delivery)) => {
                self.handle(delivery).await;
                WorkerSignal::Delivery
            }
            Some(Err(e)) => {
                tracing::warn!(worker = self.index, error = %e, "Delivery stream failed");
                self.close_channel().await;
                WorkerSignal::Failed
            }
            None => {
                tracing::warn!(worker = self.index, "Delivery stream closed");
                self.close_channel().await;
                WorkerSignal::Failed
            }
        }
    }

    async fn handle(&self, delivery: Delivery) {
        let event = event_from_delivery(&delivery);
        let tag = delivery.delivery_tag;

        tracing::debug!(
            worker = self.index,
            routing_key = %event.topic(),
            event_id = %event.id(),
            "Received delivery"
        );

        let outcome = dispatch(&self.ctx.table, event).await;

        if let Some(metrics) = &self.ctx.metrics {
            metrics.record_delivery(&self.ctx.listener, outcome.as_str());
        }

        let Some(channel) = self.channel.as_ref() else {
            return;
        };

        let result = match outcome {
            DeliveryOutcome::Ack | DeliveryOutcome::Unrouted => {
                channel.basic_ack(tag, BasicAckOptions::default()).await
            }
            DeliveryOutcome::Requeue => {
                channel
                    .basic_nack(
                        tag,
                        BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        },
                    )
                    .await
            }
        };

        if let Err(e) = result {
            tracing::warn!(
                worker = self.index,
                outcome = outcome.as_str(),
                error = %e,
                "Failed to settle delivery"
            );
        }
    }

    async fn close_channel(&mut self) {
        self.consumer = None;

        if let Some(channel) = self.channel.take() {
            if channel.status().connected() {
                if let Err(e) = channel.close(200, "Consumer closing").await {
                    tracing::debug!(worker = self.index, error = %e, "Error closing channel");
                }
            }
        }
    }
}

/// Rebuilds the event from AMQP properties: message id, timestamp (seconds)
/// and routing key.
pub fn event_from_delivery(delivery: &Delivery) -> Event {
    let properties = &delivery.properties;

    let id = properties
        .message_id()
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_default();

    let created_at = properties
        .timestamp()
        .and_then(|ts| DateTime::from_timestamp(ts as i64, 0))
        .unwrap_or_else(Utc::now);

    Event::restore(
        id,
        created_at,
        delivery.routing_key.as_str(),
        delivery.data.clone(),
    )
}
