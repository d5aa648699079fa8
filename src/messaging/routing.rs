use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use crate::event_sourcing::core::Event;

use super::error::BrokerError;
use super::traits::{Handler, HandlerPair};

// ============================================================================
// Routing - Topic Patterns and Delivery Dispatch
// ============================================================================
//
// Topics are dot-separated words. In patterns `*` stands for exactly one
// word and `#` for zero or more, as on an AMQP topic exchange.
//
// ============================================================================

pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let topic: Vec<&str> = topic.split('.').collect();
    match_words(&pattern, &topic)
}

fn match_words(pattern: &[&str], topic: &[&str]) -> bool {
    match pattern.split_first() {
        None => topic.is_empty(),
        Some((&"#", rest)) => {
            match_words(rest, topic) || (!topic.is_empty() && match_words(pattern, &topic[1..]))
        }
        Some((&"*", rest)) => !topic.is_empty() && match_words(rest, &topic[1..]),
        Some((word, rest)) => topic.first() == Some(word) && match_words(rest, &topic[1..]),
    }
}

fn is_pattern(topic: &str) -> bool {
    topic.split('.').any(|word| word == "*" || word == "#")
}

pub fn validate_listener(
    identifier: &str,
    routing_keys: &[&str],
    handlers: &[HandlerPair],
) -> Result<(), BrokerError> {
    if identifier.trim().is_empty() {
        return Err(BrokerError::InvalidListener("empty identifier".to_string()));
    }
    if routing_keys.is_empty() {
        return Err(BrokerError::InvalidListener(format!(
            "{identifier}: cannot listen without any routing keys"
        )));
    }
    if handlers.is_empty() {
        return Err(BrokerError::InvalidListener(format!(
            "{identifier}: cannot listen without any handler pairs"
        )));
    }
    Ok(())
}

/// Handlers of one listener, looked up by delivery routing key. Exact
/// topics win over patterns; patterns are tried in registration order.
#[derive(Clone, Default)]
pub struct HandlerTable {
    exact: HashMap<String, Handler>,
    patterns: Vec<(String, Handler)>,
}

impl HandlerTable {
    pub fn new(pairs: Vec<HandlerPair>) -> Self {
        let mut table = Self::default();

        for pair in pairs {
            if is_pattern(&pair.topic) {
                table.patterns.push((pair.topic, pair.handler));
            } else {
                table.exact.insert(pair.topic, pair.handler);
            }
        }

        table
    }

    pub fn resolve(&self, routing_key: &str) -> Option<&Handler> {
        self.exact.get(routing_key).or_else(|| {
            self.patterns
                .iter()
                .find(|(pattern, _)| topic_matches(pattern, routing_key))
                .map(|(_, handler)| handler)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handled; acknowledge.
    Ack,
    /// Handler failed or panicked; negative-acknowledge with requeue.
    Requeue,
    /// No handler for the routing key; acknowledge and drop.
    Unrouted,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "acked",
            Self::Requeue => "requeued",
            Self::Unrouted => "unrouted",
        }
    }
}

/// Runs the handler for `event` behind a panic boundary.
pub async fn dispatch(table: &HandlerTable, event: Event) -> DeliveryOutcome {
    let Some(handler) = table.resolve(event.topic()) else {
        tracing::warn!(
            event_id = %event.id(),
            routing_key = %event.topic(),
            "No handler matching routing key, dropping delivery"
        );
        return DeliveryOutcome::Unrouted;
    };

    let event_id = event.id().to_string();
    let routing_key = event.topic().to_string();
    let handler = handler.clone();

    match AssertUnwindSafe(async move { handler(event).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => DeliveryOutcome::Ack,
        Ok(Err(e)) => {
            tracing::warn!(
                event_id = %event_id,
                routing_key = %routing_key,
                error = %e,
                "Failed to treat delivery"
            );
            DeliveryOutcome::Requeue
        }
        Err(panic) => {
            tracing::error!(
                event_id = %event_id,
                routing_key = %routing_key,
                panic = %panic_message(panic.as_ref()),
                "Panic occurred while treating delivery"
            );
            DeliveryOutcome::Requeue
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::traits::handler;
    use chrono::Utc;

    fn event(topic: &str) -> Event {
        Event::restore("e1", Utc::now(), topic, b"{}".to_vec())
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("orders.created", "orders.created"));
        assert!(topic_matches("orders.*", "orders.created"));
        assert!(!topic_matches("orders.*", "orders.created.eu"));
        assert!(!topic_matches("orders.*", "shipping.created"));
        assert!(topic_matches("orders.#", "orders"));
        assert!(topic_matches("orders.#", "orders.created.eu"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("*.created", "shipping.created"));
        assert!(topic_matches("#.created", "a.b.created"));
        assert!(!topic_matches("orders", "orders.created"));
    }

    #[tokio::test]
    async fn test_exact_topic_wins_over_pattern() {
        let table = HandlerTable::new(vec![
            HandlerPair::new("orders.*", handler(|_| async { anyhow::bail!("pattern") })),
            HandlerPair::new("orders.created", handler(|_| async { Ok(()) })),
        ]);

        // Registered after the pattern, still picked for its own topic.
        assert_eq!(
            dispatch(&table, event("orders.created")).await,
            DeliveryOutcome::Ack
        );
        assert_eq!(
            dispatch(&table, event("orders.cancelled")).await,
            DeliveryOutcome::Requeue
        );
        assert!(table.resolve("shipping.created").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_outcomes() {
        let table = HandlerTable::new(vec![
            HandlerPair::new("ok", handler(|_| async { Ok(()) })),
            HandlerPair::new("fail", handler(|_| async { anyhow::bail!("boom") })),
            HandlerPair::new(
                "panic",
                handler(|event| async move {
                    if event.topic() == "panic" {
                        panic!("handler exploded");
                    }
                    Ok(())
                }),
            ),
        ]);

        assert_eq!(dispatch(&table, event("ok")).await, DeliveryOutcome::Ack);
        assert_eq!(dispatch(&table, event("fail")).await, DeliveryOutcome::Requeue);
        assert_eq!(dispatch(&table, event("panic")).await, DeliveryOutcome::Requeue);
        assert_eq!(dispatch(&table, event("other")).await, DeliveryOutcome::Unrouted);
    }

    #[test]
    fn test_listener_validation() {
        let pairs = vec![HandlerPair::new("t", handler(|_| async { Ok(()) }))];

        assert!(validate_listener("billing", &["t"], &pairs).is_ok());
        assert!(validate_listener("", &["t"], &pairs).is_err());
        assert!(validate_listener("billing", &[], &pairs).is_err());
        assert!(validate_listener("billing", &["t"], &[]).is_err());
    }
}
