//! Prometheus metrics for the hub feed

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_int_counter_vec, register_int_gauge_vec, Encoder, GaugeVec,
    IntCounterVec, IntGaugeVec, TextEncoder,
};

const LABEL_FEED: &str = "feed";
const LABEL_CATEGORY: &str = "category";
const LABEL_CAUSE: &str = "cause";

/// Hub pushes received per category
static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "bxfeed_hub_messages_total",
        "Total hub pushes received per category",
        &[LABEL_FEED, LABEL_CATEGORY]
    )
    .expect("Failed to register messages_total metric")
});

/// Pushes that could not be decoded
static DECODE_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "bxfeed_decode_errors_total",
        "Hub pushes that failed to decode per category",
        &[LABEL_FEED, LABEL_CATEGORY]
    )
    .expect("Failed to register decode_errors_total metric")
});

/// Handler invocations that returned an error or panicked
static HANDLER_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "bxfeed_handler_errors_total",
        "Feed handler failures per category",
        &[LABEL_FEED, LABEL_CATEGORY]
    )
    .expect("Failed to register handler_errors_total metric")
});

/// 1 while the hub session is subscribed and serving
static HUB_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "bxfeed_hub_connected",
        "Hub session status (1=active, 0=not active)",
        &[LABEL_FEED]
    )
    .expect("Failed to register hub_connected metric")
});

/// Hub sessions ended, by cause
static SESSION_ENDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "bxfeed_session_ends_total",
        "Hub sessions ended per cause",
        &[LABEL_FEED, LABEL_CAUSE]
    )
    .expect("Failed to register session_ends_total metric")
});

/// Last heartbeat push (epoch seconds)
static LAST_HEARTBEAT_TIMESTAMP: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "bxfeed_last_heartbeat_timestamp",
        "Unix timestamp of the last hub heartbeat",
        &[LABEL_FEED]
    )
    .expect("Failed to register last_heartbeat_timestamp metric")
});

/// Handle for recording metrics for one feed
#[derive(Clone, Debug)]
pub struct HubMetrics {
    feed: String,
}

impl HubMetrics {
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }

    pub fn inc_message(&self, category: &str) {
        MESSAGES_TOTAL
            .with_label_values(&[&self.feed, category])
            .inc();
    }

    pub fn inc_decode_error(&self, category: &str) {
        DECODE_ERRORS_TOTAL
            .with_label_values(&[&self.feed, category])
            .inc();
    }

    pub fn inc_handler_error(&self, category: &str) {
        HANDLER_ERRORS_TOTAL
            .with_label_values(&[&self.feed, category])
            .inc();
    }

    pub fn set_connected(&self, connected: bool) {
        HUB_CONNECTED
            .with_label_values(&[&self.feed])
            .set(i64::from(connected));
    }

    pub fn inc_session_end(&self, cause: &str) {
        SESSION_ENDS_TOTAL
            .with_label_values(&[&self.feed, cause])
            .inc();
    }

    pub fn set_last_heartbeat(&self) {
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        LAST_HEARTBEAT_TIMESTAMP
            .with_label_values(&[&self.feed])
            .set(now);
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_metrics_recorded() {
        let metrics = HubMetrics::new("metrics-test");
        metrics.inc_message("ticker");
        metrics.inc_message("ticker");
        metrics.inc_handler_error("ticker");
        metrics.set_connected(true);
        metrics.inc_session_end("heartbeat_timeout");
        metrics.set_last_heartbeat();

        assert_eq!(
            MESSAGES_TOTAL
                .with_label_values(&["metrics-test", "ticker"])
                .get(),
            2
        );
        assert_eq!(HUB_CONNECTED.with_label_values(&["metrics-test"]).get(), 1);

        metrics.set_connected(false);
        assert_eq!(HUB_CONNECTED.with_label_values(&["metrics-test"]).get(), 0);
    }

    #[test]
    fn test_encode_metrics() {
        HubMetrics::new("encode-test").inc_message("trade");
        let output = encode_metrics().unwrap();
        assert!(output.contains("bxfeed_hub_messages_total"));
    }
}
