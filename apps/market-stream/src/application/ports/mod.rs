//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters and consumers implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `UpstreamConnector` / `UpstreamStream`: one streaming session per symbol
//! - `LifecycleSink`: fire-and-forget sink for connection lifecycle events
//!
//! ## Driver Ports (Inbound)
//!
//! - `PriceHandler`: consumer callback receiving price updates

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::streaming::PriceUpdate;
use crate::domain::subscription::SubscriptionId;
use crate::domain::symbol::SymbolKey;

// =============================================================================
// Consumer Handler
// =============================================================================

/// Receives price updates for one subscription.
///
/// Called zero or more times until the subscription is cancelled. An error
/// (or panic) is reported to the lifecycle sink and never reaches other
/// subscribers.
///
/// Implemented for any `Fn(&PriceUpdate) -> anyhow::Result<()>` closure.
#[cfg_attr(test, mockall::automock)]
pub trait PriceHandler: Send + Sync {
    /// Handle one update.
    ///
    /// # Errors
    ///
    /// Any error is logged by the pool; it does not affect the connection.
    fn on_update(&self, update: &PriceUpdate) -> anyhow::Result<()>;
}

impl<F> PriceHandler for F
where
    F: Fn(&PriceUpdate) -> anyhow::Result<()> + Send + Sync,
{
    fn on_update(&self, update: &PriceUpdate) -> anyhow::Result<()> {
        self(update)
    }
}

// =============================================================================
// Upstream Transport
// =============================================================================

/// Errors reported by an upstream transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The connect did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The socket reported an error.
    #[error("socket error: {0}")]
    Socket(String),

    /// No pong arrived within the heartbeat timeout.
    #[error("heartbeat timed out after {0:?}")]
    HeartbeatTimeout(Duration),

    /// The server closed the stream.
    #[error("closed by server: {0}")]
    Closed(String),

    /// The session task panicked.
    #[error("session panicked: {0}")]
    Panicked(String),
}

/// One live upstream session for a single symbol.
#[async_trait]
pub trait UpstreamStream: Send {
    /// Wait for the next text frame.
    ///
    /// Returns `None` when the stream ended without an error.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the session. Must not wait on the server's acknowledgement.
    async fn close(&mut self);
}

/// Opens upstream sessions.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open a session streaming trades for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the session cannot be opened.
    async fn connect(&self, symbol: &SymbolKey) -> Result<Box<dyn UpstreamStream>, TransportError>;
}

// =============================================================================
// Lifecycle Sink
// =============================================================================

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The last subscriber left and nobody came back within the grace period.
    GracePeriodExpired,
    /// The upstream dropped while nobody was subscribed.
    DroppedWithoutSubscribers,
    /// `disconnect_all` was called.
    Shutdown,
}

impl TeardownReason {
    /// Reason name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GracePeriodExpired => "grace_period_expired",
            Self::DroppedWithoutSubscribers => "dropped_without_subscribers",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Connection lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A new connection was created for a key.
    Created {
        /// Symbol key.
        symbol: SymbolKey,
        /// Connection instance id.
        connection_id: Uuid,
    },
    /// A connect attempt started.
    Connecting {
        /// Symbol key.
        symbol: SymbolKey,
        /// Failures so far (0 on the first connect).
        attempt: u32,
    },
    /// The upstream session opened.
    Connected {
        /// Symbol key.
        symbol: SymbolKey,
        /// Connection instance id.
        connection_id: Uuid,
    },
    /// The session ended or a connect failed unexpectedly.
    Disconnected {
        /// Symbol key.
        symbol: SymbolKey,
        /// Transport error.
        error: TransportError,
    },
    /// A reconnect was scheduled.
    ReconnectScheduled {
        /// Symbol key.
        symbol: SymbolKey,
        /// Attempt number (1-based).
        attempt: u32,
        /// Backoff delay before the attempt.
        delay: Duration,
    },
    /// Reconnect attempts were exhausted.
    Failed {
        /// Symbol key.
        symbol: SymbolKey,
        /// Consecutive failures observed.
        attempts: u32,
    },
    /// The connection was removed from the pool.
    TornDown {
        /// Symbol key.
        symbol: SymbolKey,
        /// Why.
        reason: TeardownReason,
    },
    /// An inbound frame could not be decoded.
    FrameDropped {
        /// Symbol key.
        symbol: SymbolKey,
        /// Decode error.
        error: String,
    },
    /// A subscriber's handler failed.
    HandlerFailed {
        /// Symbol key.
        symbol: SymbolKey,
        /// The failing subscription.
        subscription_id: SubscriptionId,
        /// Error or panic message.
        error: String,
    },
}

/// Fire-and-forget observer of lifecycle events.
#[cfg_attr(test, mockall::automock)]
pub trait LifecycleSink: Send + Sync {
    /// Record one event. Must not block.
    fn record(&self, event: &LifecycleEvent);
}
