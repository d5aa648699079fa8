use std::sync::Arc;

use chrono::{DateTime, Utc};
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, ExchangeKind};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::messaging::error::BrokerError;
use crate::messaging::routing::HandlerTable;
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig};

use super::connection::Connection;
use super::worker::{Worker, WorkerContext};

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

/// One message as handed to the exchange.
#[derive(Debug, Clone)]
pub struct OutgoingMessage<'a> {
    pub routing_key: &'a str,
    pub content_type: &'a str,
    pub message_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub body: &'a [u8],
}

// ============================================================================
// RabbitMQ Client
// ============================================================================
//
// Owns the connection, the durable topic exchange and the publishing
// channel. Publishers serialize on the channel mutex; a channel found closed
// is replaced once before the error is surfaced. Publishes wait for the
// broker confirm.
//
// ============================================================================

pub struct RabbitMqClient {
    connection: Arc<Connection>,
    exchange: String,
    publish_channel: Mutex<Option<Channel>>,
    cancel: CancellationToken,
    metrics: Option<Arc<Metrics>>,
}

impl RabbitMqClient {
    /// Dials (retrying while the broker is unreachable) and declares the
    /// exchange.
    pub async fn connect(
        config: &BrokerConfig,
        cancel: CancellationToken,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self, BrokerError> {
        let cancel = cancel.child_token();
        let connection = Connection::new(
            &config.url,
            config.retry_delay,
            cancel.clone(),
            metrics.clone(),
        );

        retry_on_transient(&RetryConfig::initial_connect(), "rabbitmq_connect", |_attempt| {
            connection.connect()
        })
        .await?;

        let channel = connection.channel().await?;
        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        if let Err(e) = channel.close(200, "Exchange declared").await {
            tracing::debug!(error = %e, "Error closing declare channel");
        }

        tracing::info!(exchange = %config.exchange, "Exchange declared");

        Ok(Self {
            connection,
            exchange: config.exchange.clone(),
            publish_channel: Mutex::new(None),
            cancel,
            metrics,
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub async fn publish(&self, message: OutgoingMessage<'_>) -> Result<(), BrokerError> {
        let mut guard = self.publish_channel.lock().await;

        match self.publish_on(&mut guard, &message).await {
            Err(e) if e.is_closed_channel() => {
                tracing::debug!(error = %e, "Publish channel closed, retrying on a new one");
                *guard = None;
                self.publish_on(&mut guard, &message).await
            }
            result => result,
        }
    }

    async fn publish_on(
        &self,
        slot: &mut Option<Channel>,
        message: &OutgoingMessage<'_>,
    ) -> Result<(), BrokerError> {
        if slot.as_ref().map_or(true, |ch| !ch.status().connected()) {
            let channel = self.connection.channel().await?;
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await?;
            *slot = Some(channel);
        }

        let channel = slot.as_ref().ok_or(BrokerError::Disconnected)?;

        let properties = BasicProperties::default()
            .with_content_type(message.content_type.to_string().into())
            .with_message_id(message.message_id.to_string().into())
            .with_timestamp(message.timestamp.timestamp().max(0) as u64)
            .with_delivery_mode(PERSISTENT);

        let confirmation = channel
            .basic_publish(
                &self.exchange,
                message.routing_key,
                BasicPublishOptions::default(),
                message.body,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(BrokerError::Nacked(message.message_id.to_string()));
        }

        Ok(())
    }

    /// Starts `consumers` workers on the queue named `listener`. Each sender
    /// in the returned list fires once its worker is streaming.
    pub fn stream(
        &self,
        cancel: CancellationToken,
        listener: &str,
        routing_keys: &[&str],
        table: HandlerTable,
        consumers: usize,
    ) -> Vec<oneshot::Receiver<()>> {
        let ctx = WorkerContext {
            listener: listener.to_string(),
            queue: listener.to_string(),
            exchange: self.exchange.clone(),
            routing_keys: routing_keys.iter().map(|k| k.to_string()).collect(),
            connection: self.connection.clone(),
            table: Arc::new(table),
            retry_delay: self.connection.retry_delay(),
            cancel,
            metrics: self.metrics.clone(),
        };

        (0..consumers.max(1))
            .map(|index| {
                let (ready_tx, ready_rx) = oneshot::channel();
                tokio::spawn(Worker::new(index, ctx.clone(), ready_tx).run());
                ready_rx
            })
            .collect()
    }

    /// Stops the connection supervisor and closes the connection. Workers stop
    /// with the token their listener was given.
    pub async fn close(&self) {
        self.cancel.cancel();

        if let Some(channel) = self.publish_channel.lock().await.take() {
            if let Err(e) = channel.close(200, "Normal shutdown").await {
                tracing::debug!(error = %e, "Error closing publish channel");
            }
        }

        self.connection.close().await;
    }
}
