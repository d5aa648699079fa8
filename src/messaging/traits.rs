use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::event_sourcing::core::{Event, EventError, Payload};

use super::error::BrokerError;

// ============================================================================
// Publisher / Listener Contracts
// ============================================================================
//
// Implemented by the AMQP broker and by the in-process broker, so the
// poller and the handlers never know which one they run against.
//
// ============================================================================

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Listener: Send + Sync {
    /// Subscribes `handlers` under `identifier`, bound to every pattern in
    /// `routing_keys`. Returns once consumption is set up, or early if
    /// `cancel` fires first. Consumption goes on in the background until
    /// `cancel` fires.
    async fn listen(
        &self,
        cancel: CancellationToken,
        identifier: &str,
        routing_keys: &[&str],
        handlers: Vec<HandlerPair>,
    ) -> Result<(), BrokerError>;
}

pub type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handler for one topic. The topic may itself be a pattern (`orders.*`).
#[derive(Clone)]
pub struct HandlerPair {
    pub topic: String,
    pub handler: Handler,
}

impl HandlerPair {
    pub fn new(topic: impl Into<String>, handler: Handler) -> Self {
        Self {
            topic: topic.into(),
            handler,
        }
    }
}

impl std::fmt::Debug for HandlerPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerPair")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Wraps an async closure over the raw event.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| f(event).boxed())
}

/// Decodes the payload into `P` and checks it before calling `f`.
/// Decoding or validation failures are handler errors, so the delivery is
/// requeued.
pub fn typed_handler<P, F, Fut>(f: F) -> Handler
where
    P: Payload + DeserializeOwned + Send + 'static,
    F: Fn(Event, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event: Event| {
        let payload = match event.decode::<P>() {
            Ok(payload) => payload,
            Err(e) => return async move { Err(e.into()) }.boxed(),
        };

        if !payload.is_valid() {
            let topic = event.topic().to_string();
            return async move { Err(EventError::InvalidPayload { topic }.into()) }.boxed();
        }

        f(event, payload).boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::event::tests::TestPayload;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn raw(body: &[u8]) -> Event {
        Event::restore("e1", Utc::now(), "example", body.to_vec())
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_payload() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let h = typed_handler(move |event: Event, payload: TestPayload| {
            let counter = counter.clone();
            async move {
                assert_eq!(event.id(), "e1");
                assert_eq!(payload.key, "value");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        h(raw(br#"{"key":"value"}"#)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_typed_handler_rejects_malformed_body() {
        let h = typed_handler(|_event: Event, _payload: TestPayload| async { Ok(()) });

        let err = h(raw(b"not json")).await.unwrap_err();
        assert!(err.downcast_ref::<EventError>().is_some());
    }
}
