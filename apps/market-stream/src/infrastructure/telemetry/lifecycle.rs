//! Lifecycle events to logs and metrics.

use crate::application::ports::{LifecycleEvent, LifecycleSink};
use crate::infrastructure::metrics;

/// Default [`LifecycleSink`]: one structured log line per event, plus the
/// matching Prometheus counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLifecycleSink;

impl LifecycleSink for TracingLifecycleSink {
    fn record(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Created {
                symbol,
                connection_id,
            } => {
                tracing::info!(symbol = %symbol, connection_id = %connection_id, "Connection created");
                metrics::record_connection_created();
            }
            LifecycleEvent::Connecting { symbol, attempt } => {
                tracing::debug!(symbol = %symbol, attempt, "Connecting upstream");
            }
            LifecycleEvent::Connected {
                symbol,
                connection_id,
            } => {
                tracing::info!(symbol = %symbol, connection_id = %connection_id, "Upstream stream open");
            }
            LifecycleEvent::Disconnected { symbol, error } => {
                tracing::warn!(symbol = %symbol, error = %error, "Upstream stream lost");
            }
            LifecycleEvent::ReconnectScheduled {
                symbol,
                attempt,
                delay,
            } => {
                tracing::info!(
                    symbol = %symbol,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Reconnect scheduled"
                );
                metrics::record_reconnect();
            }
            LifecycleEvent::Failed { symbol, attempts } => {
                tracing::error!(symbol = %symbol, attempts, "Reconnect attempts exhausted");
                metrics::record_connection_failed();
            }
            LifecycleEvent::TornDown { symbol, reason } => {
                tracing::info!(symbol = %symbol, reason = reason.as_str(), "Connection torn down");
                metrics::record_connection_torn_down(*reason);
            }
            LifecycleEvent::FrameDropped { symbol, error } => {
                tracing::warn!(symbol = %symbol, error = %error, "Dropped undecodable frame");
                metrics::record_frame_dropped();
            }
            LifecycleEvent::HandlerFailed {
                symbol,
                subscription_id,
                error,
            } => {
                tracing::warn!(
                    symbol = %symbol,
                    subscription_id,
                    error = %error,
                    "Subscriber handler failed"
                );
                metrics::record_handler_error();
            }
        }
    }
}
