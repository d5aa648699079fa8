use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use outbox_relay::config::AppConfig;
use outbox_relay::domain::order::{
    OrderCommand, OrderCommandHandler, OrderCreated, OrderItem, ORDERS_TABLE,
};
use outbox_relay::event_sourcing::store::{ensure_schema, PgAggregateStore, PgOutbox};
use outbox_relay::messaging::{
    handler, typed_handler, HandlerPair, Listener, RabbitMqBroker, RabbitMqClient,
};
use outbox_relay::metrics::Metrics;
use outbox_relay::outbox::Poller;
use outbox_relay::utils::{SystemClock, UuidGenerator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,outbox_relay=debug")),
        )
        .init();

    tracing::info!("🚀 Starting transactional outbox relay");

    let config = AppConfig::from_env()?;
    let cancel = CancellationToken::new();

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!(
        "📊 Metrics registry created with {} metrics",
        metrics.registry().gather().len()
    );

    // === 2. Postgres ===
    tracing::info!("Connecting to Postgres...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    ensure_schema(&pool, &[ORDERS_TABLE]).await?;

    let clock = Arc::new(SystemClock);
    let outbox = Arc::new(PgOutbox::new(pool.clone(), clock.clone()));
    let orders = Arc::new(
        PgAggregateStore::new(pool.clone(), ORDERS_TABLE)?.with_metrics(metrics.clone()),
    );

    // === 3. RabbitMQ ===
    let client = Arc::new(
        RabbitMqClient::connect(&config.broker, cancel.clone(), Some(metrics.clone())).await?,
    );
    let broker = Arc::new(RabbitMqBroker::new(client.clone(), config.broker.consumers));

    // === 4. Outbox poller ===
    let poller = Arc::new(
        Poller::new(outbox.clone(), broker.clone(), &config.outbox).with_metrics(metrics.clone()),
    );
    let poller_task = {
        let poller = poller.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move { poller.run(cancel).await })
    };

    // === 5. Demo listener ===
    broker
        .listen(
            cancel.child_token(),
            "order-audit",
            &["orders.*"],
            vec![
                HandlerPair::new(
                    "orders.created",
                    typed_handler(|event, created: OrderCreated| async move {
                        tracing::info!(
                            event_id = %event.id(),
                            aggregate_id = %created.order_id,
                            items = created.items.len(),
                            "📦 Order created"
                        );
                        Ok(())
                    }),
                ),
                HandlerPair::new(
                    "orders.*",
                    handler(|event| async move {
                        tracing::info!(event_id = %event.id(), topic = %event.topic(), "📨 Order event");
                        Ok(())
                    }),
                ),
            ],
        )
        .await?;

    // === 6. Demonstrate an order lifecycle ===
    let commands = OrderCommandHandler::new(orders, clock, Arc::new(UuidGenerator));
    let order_id = uuid::Uuid::now_v7().to_string();

    commands
        .handle(
            &order_id,
            OrderCommand::CreateOrder {
                customer_id: uuid::Uuid::new_v4().to_string(),
                items: vec![OrderItem::new("sku-1", 2), OrderItem::new("sku-2", 1)],
            },
        )
        .await?;
    commands.handle(&order_id, OrderCommand::ConfirmOrder).await?;
    commands
        .handle(
            &order_id,
            OrderCommand::NotifyCustomer {
                message: "Your order is confirmed".to_string(),
            },
        )
        .await?;

    tracing::info!("✅ Demo order written, waiting for Ctrl+C");

    // === 7. Shutdown ===
    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutting down");

    cancel.cancel();
    if let Err(e) = poller_task.await {
        tracing::error!(error = %e, "Poller task failed");
    }
    client.close().await;
    pool.close().await;

    match metrics.encode_text() {
        Ok(text) => tracing::debug!("Final metrics:\n{}", text),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }

    tracing::info!("👋 Stopped");
    Ok(())
}
