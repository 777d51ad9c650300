//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Records**: Counts of records decoded, relayed, and degenerate
//! - **Broadcast**: Deliveries, push failures, subscriber counts
//! - **Connection**: Reconnects, write retries
//! - **Windows**: Published/dropped windows, rate and latency gauges
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            #[allow(clippy::expect_used)]
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Record counters
    describe_counter!(
        "relay_feed_records_total",
        "Total records received from the upstream feed"
    );
    describe_counter!(
        "relay_degenerate_records_total",
        "Records that did not carry the record marker"
    );

    // Broadcast counters
    describe_counter!(
        "relay_broadcast_deliveries_total",
        "Total record deliveries to subscribers"
    );
    describe_counter!(
        "relay_broadcast_failures_total",
        "Subscriber pushes that failed and were skipped"
    );
    describe_counter!(
        "relay_subscribers_registered_total",
        "Subscribers registered over the process lifetime"
    );

    // Connection counters
    describe_counter!(
        "relay_reconnects_total",
        "Reconnection attempts to the upstream feed"
    );

    // Window metrics
    describe_counter!(
        "relay_windows_published_total",
        "Aggregation windows published to the metrics channel"
    );
    describe_counter!(
        "relay_windows_dropped_total",
        "Aggregation windows rejected by validation"
    );
    describe_gauge!(
        "relay_window_rate",
        "Throughput of the last window in records per second"
    );
    describe_gauge!(
        "relay_window_moving_avg_rate",
        "Moving average of recent window rates"
    );
    describe_gauge!(
        "relay_window_avg_latency_us",
        "Average per-record processing latency of the last window"
    );
}
