use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for the outbox relay
// ============================================================================
//
// Covers:
// - Outbox polling (pending backlog, publish and mark outcomes)
// - Broker consumption (ack / requeue / unrouted, live workers, reconnects)
// - Aggregate persistence (version conflicts)
//
// Serving the registry over HTTP is left to the embedding application;
// `encode_text` renders the exposition format.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Outbox Metrics
    pub events_published: IntCounterVec,
    pub publish_failures: IntCounterVec,
    pub mark_failures: IntCounter,
    pub pending_events: IntGauge,
    pub poll_duration: Histogram,

    // Broker Metrics
    pub deliveries: IntCounterVec,
    pub live_workers: IntGaugeVec,
    pub reconnects: IntCounter,

    // Store Metrics
    pub save_conflicts: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Outbox Metrics
        let events_published = IntCounterVec::new(
            Opts::new("outbox_events_published_total", "Events handed to the broker and marked"),
            &["topic"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("outbox_publish_failures_total", "Publish attempts that failed"),
            &["topic"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let mark_failures = IntCounter::new(
            "outbox_mark_failures_total",
            "Published events that could not be marked (will be re-delivered)",
        )?;
        registry.register(Box::new(mark_failures.clone()))?;

        let pending_events = IntGauge::new(
            "outbox_pending_events",
            "Pending events seen by the last poll",
        )?;
        registry.register(Box::new(pending_events.clone()))?;

        let poll_duration = Histogram::with_opts(
            HistogramOpts::new("outbox_poll_duration_seconds", "Duration of one poll tick")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(poll_duration.clone()))?;

        // Broker Metrics
        let deliveries = IntCounterVec::new(
            Opts::new("broker_deliveries_total", "Deliveries by outcome"),
            &["listener", "outcome"],
        )?;
        registry.register(Box::new(deliveries.clone()))?;

        let live_workers = IntGaugeVec::new(
            Opts::new("broker_live_workers", "Consumer workers currently streaming"),
            &["listener"],
        )?;
        registry.register(Box::new(live_workers.clone()))?;

        let reconnects = IntCounter::new(
            "broker_reconnects_total",
            "Successful redials after a lost connection",
        )?;
        registry.register(Box::new(reconnects.clone()))?;

        // Store Metrics
        let save_conflicts = IntCounterVec::new(
            Opts::new("store_save_conflicts_total", "Saves rejected by the version check"),
            &["table"],
        )?;
        registry.register(Box::new(save_conflicts.clone()))?;

        Ok(Self {
            registry,
            events_published,
            publish_failures,
            mark_failures,
            pending_events,
            poll_duration,
            deliveries,
            live_workers,
            reconnects,
            save_conflicts,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn record_publish(&self, topic: &str, success: bool) {
        if success {
            self.events_published.with_label_values(&[topic]).inc();
        } else {
            self.publish_failures.with_label_values(&[topic]).inc();
        }
    }

    pub fn record_mark_failure(&self) {
        self.mark_failures.inc();
    }

    pub fn record_poll(&self, pending: usize, duration_secs: f64) {
        self.pending_events.set(pending as i64);
        self.poll_duration.observe(duration_secs);
    }

    pub fn record_delivery(&self, listener: &str, outcome: &str) {
        self.deliveries.with_label_values(&[listener, outcome]).inc();
    }

    pub fn worker_started(&self, listener: &str) {
        self.live_workers.with_label_values(&[listener]).inc();
    }

    pub fn worker_stopped(&self, listener: &str) {
        self.live_workers.with_label_values(&[listener]).dec();
    }

    pub fn record_reconnect(&self) {
        self.reconnects.inc();
    }

    pub fn record_save_conflict(&self, table: &str) {
        self.save_conflicts.with_label_values(&[table]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_publish() {
        let metrics = Metrics::new().unwrap();
        metrics.record_publish("orders.created", true);
        metrics.record_publish("orders.created", true);
        metrics.record_publish("orders.created", false);

        let gathered = metrics.registry.gather();
        let published = gathered
            .iter()
            .find(|m| m.name() == "outbox_events_published_total")
            .unwrap();
        assert_eq!(published.metric[0].counter.value, Some(2.0));

        let failed = gathered
            .iter()
            .find(|m| m.name() == "outbox_publish_failures_total")
            .unwrap();
        assert_eq!(failed.metric[0].counter.value, Some(1.0));
    }

    #[test]
    fn test_delivery_outcomes_are_labelled() {
        let metrics = Metrics::new().unwrap();
        metrics.record_delivery("billing", "acked");
        metrics.record_delivery("billing", "requeued");

        let gathered = metrics.registry.gather();
        let deliveries = gathered
            .iter()
            .find(|m| m.name() == "broker_deliveries_total")
            .unwrap();
        assert_eq!(deliveries.metric.len(), 2);
    }

    #[test]
    fn test_live_workers_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.worker_started("billing");
        metrics.worker_started("billing");
        metrics.worker_stopped("billing");

        assert_eq!(metrics.live_workers.with_label_values(&["billing"]).get(), 1);
    }

    #[test]
    fn test_encode_text() {
        let metrics = Metrics::new().unwrap();
        metrics.record_save_conflict("orders");

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("store_save_conflicts_total{table=\"orders\"} 1"));
    }
}
