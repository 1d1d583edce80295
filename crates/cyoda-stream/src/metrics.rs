//! Stream metrics

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Metrics for inbound message handling and connection churn
#[derive(Clone)]
pub struct StreamMetrics {
    registry: Registry,

    /// Handled messages by event type and outcome
    pub messages_total: IntCounterVec,

    /// Time spent in the downstream chain per message
    pub message_duration_seconds: HistogramVec,

    /// Messages whose handling failed, by event type and error kind
    pub failures_total: IntCounterVec,

    /// Reconnect attempts by reason
    pub reconnects_total: IntCounterVec,
}

impl StreamMetrics {
    /// Create and register stream metrics
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages_total = IntCounterVec::new(
            Opts::new("cyoda_stream_messages_total", "Inbound messages handled"),
            &["event_type", "outcome"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let message_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "cyoda_stream_message_duration_seconds",
                "Inbound message handling duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(message_duration_seconds.clone()))?;

        let failures_total = IntCounterVec::new(
            Opts::new(
                "cyoda_stream_failures_total",
                "Inbound messages whose handling failed",
            ),
            &["event_type", "kind"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let reconnects_total = IntCounterVec::new(
            Opts::new("cyoda_stream_reconnects_total", "Stream reconnect attempts"),
            &["reason"],
        )?;
        registry.register(Box::new(reconnects_total.clone()))?;

        Ok(Self {
            registry: registry.clone(),
            messages_total,
            message_duration_seconds,
            failures_total,
            reconnects_total,
        })
    }

    /// Metrics on a private registry, for tests and embedding without export
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Self::new(&Registry::new())
    }

    /// Record one handled message
    pub fn record_message(&self, event_type: &str, outcome: &str, duration_secs: f64) {
        self.messages_total
            .with_label_values(&[event_type, outcome])
            .inc();
        self.message_duration_seconds
            .with_label_values(&[event_type])
            .observe(duration_secs);
    }

    /// Record a swallowed handling failure
    pub fn record_failure(&self, event_type: &str, kind: &str) {
        self.failures_total
            .with_label_values(&[event_type, kind])
            .inc();
    }

    /// Record a reconnect caused by `reason`
    pub fn record_reconnect(&self, reason: &str) {
        self.reconnects_total.with_label_values(&[reason]).inc();
    }

    /// Prometheus text exposition of everything in the registry
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_messages_show_up_in_exposition() {
        let metrics = StreamMetrics::unregistered().unwrap();
        metrics.record_message("CalculationMemberKeepAliveEvent", "responded", 0.002);
        metrics.record_reconnect("transport");

        let text = metrics.render();
        assert!(text.contains("cyoda_stream_messages_total"));
        assert!(text.contains("outcome=\"responded\""));
        assert!(text.contains("cyoda_stream_reconnects_total{reason=\"transport\"} 1"));
    }

    #[test]
    fn double_registration_is_reported() {
        let registry = Registry::new();
        StreamMetrics::new(&registry).unwrap();
        assert!(StreamMetrics::new(&registry).is_err());
    }
}
