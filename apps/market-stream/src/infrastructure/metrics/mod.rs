//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Upstream frames received and dropped
//! - **Delivery**: Updates delivered, handler failures, stream buffer drops
//! - **Connections**: Active connections, creations, reconnects, failures
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::ports::TeardownReason;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder was already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
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
    // Frame counters
    describe_counter!(
        "market_stream_frames_received_total",
        "Total text frames received from upstream"
    );
    describe_counter!(
        "market_stream_frames_dropped_total",
        "Total upstream frames dropped because they could not be decoded"
    );

    // Delivery counters
    describe_counter!(
        "market_stream_updates_delivered_total",
        "Total price updates handed to subscriber handlers"
    );
    describe_counter!(
        "market_stream_handler_errors_total",
        "Total subscriber handler errors and panics"
    );
    describe_counter!(
        "market_stream_stream_buffer_drops_total",
        "Total updates dropped because a stream consumer's buffer was full"
    );

    // Connection metrics
    describe_gauge!(
        "market_stream_active_connections",
        "Number of upstream connections tracked by the pool"
    );
    describe_counter!(
        "market_stream_connections_created_total",
        "Total upstream connections created"
    );
    describe_counter!(
        "market_stream_connections_torn_down_total",
        "Total upstream connections torn down, by reason"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Total reconnect attempts scheduled"
    );
    describe_counter!(
        "market_stream_connections_failed_total",
        "Total connections that exhausted their reconnect attempts"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a text frame received from upstream.
pub fn record_frame_received() {
    counter!("market_stream_frames_received_total").increment(1);
}

/// Record a frame dropped by the codec.
pub fn record_frame_dropped() {
    counter!("market_stream_frames_dropped_total").increment(1);
}

/// Record updates delivered to handlers.
pub fn record_updates_delivered(count: u64) {
    if count > 0 {
        counter!("market_stream_updates_delivered_total").increment(count);
    }
}

/// Record a failing handler.
pub fn record_handler_error() {
    counter!("market_stream_handler_errors_total").increment(1);
}

/// Record an update dropped for a full stream buffer.
pub fn record_stream_overflow() {
    counter!("market_stream_stream_buffer_drops_total").increment(1);
}

/// Update the active connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_connections(count: usize) {
    gauge!("market_stream_active_connections").set(count as f64);
}

/// Record a new connection.
pub fn record_connection_created() {
    counter!("market_stream_connections_created_total").increment(1);
}

/// Record a teardown.
pub fn record_connection_torn_down(reason: TeardownReason) {
    counter!(
        "market_stream_connections_torn_down_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a scheduled reconnect.
pub fn record_reconnect() {
    counter!("market_stream_reconnects_total").increment(1);
}

/// Record a connection that gave up.
pub fn record_connection_failed() {
    counter!("market_stream_connections_failed_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_updates_delivered(3);
        record_connection_torn_down(TeardownReason::Shutdown);
        set_active_connections(2);
    }

    #[test]
    fn init_is_idempotent() {
        let _first = init_metrics();
        let second = init_metrics();

        record_connection_created();
        set_active_connections(1);

        let rendered = second.render();
        assert!(rendered.contains("market_stream_connections_created_total"));
        assert!(rendered.contains("market_stream_active_connections"));
        assert!(get_metrics_handle().is_some());
    }
}
