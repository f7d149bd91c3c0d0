//! Market Data Streaming Types
//!
//! The events delivered to consumers and the lifecycle states of an
//! upstream connection. These types are transport-agnostic.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::symbol::SymbolKey;

// =============================================================================
// Consumer Events
// =============================================================================

/// A single price observation for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceTick {
    /// Normalized symbol key.
    pub symbol: SymbolKey,
    /// Trade price.
    pub price: Decimal,
    /// Upstream event time.
    pub timestamp: DateTime<Utc>,
    /// `true` when replayed from the cache on subscribe.
    pub cached: bool,
}

/// A failure notice for a symbol's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamFailure {
    /// Normalized symbol key.
    pub symbol: SymbolKey,
    /// Human-readable failure description.
    pub error: String,
    /// `true` when no further updates will arrive on this subscription.
    pub terminal: bool,
}

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriceUpdate {
    /// A live or replayed price.
    Tick(PriceTick),
    /// The stream failed.
    Failure(StreamFailure),
}

impl PriceUpdate {
    /// The symbol this update belongs to.
    #[must_use]
    pub const fn symbol(&self) -> &SymbolKey {
        match self {
            Self::Tick(tick) => &tick.symbol,
            Self::Failure(failure) => &failure.symbol,
        }
    }

    /// The tick, if this is a price update.
    #[must_use]
    pub const fn as_tick(&self) -> Option<&PriceTick> {
        match self {
            Self::Tick(tick) => Some(tick),
            Self::Failure(_) => None,
        }
    }

    /// Whether this update ends the subscription.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failure(StreamFailure { terminal: true, .. }))
    }
}

// =============================================================================
// Connection Lifecycle
// =============================================================================

/// Lifecycle state of one upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Connect in progress.
    Connecting,
    /// Receiving frames.
    Open,
    /// Waiting for a scheduled reconnect.
    Reconnecting,
    /// Teardown in progress.
    Closing,
    /// Torn down.
    Closed,
    /// Reconnect attempts exhausted.
    Failed,
}

impl ConnectionState {
    /// Whether the connection has been torn down or has given up.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Closing | Self::Closed | Self::Failed)
    }

    /// State name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// Stream-level failures surfaced to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Reconnection gave up.
    #[error("reconnect attempts exhausted after {attempts} failures")]
    ReconnectExhausted {
        /// Number of consecutive failures observed.
        attempts: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SymbolKey {
        SymbolKey::parse("BTCUSDT").unwrap()
    }

    #[test]
    fn terminal_detection() {
        let tick = PriceUpdate::Tick(PriceTick {
            symbol: key(),
            price: Decimal::new(650_005, 1),
            timestamp: Utc::now(),
            cached: false,
        });
        assert!(!tick.is_terminal());
        assert!(tick.as_tick().is_some());

        let failure = PriceUpdate::Failure(StreamFailure {
            symbol: key(),
            error: StreamError::ReconnectExhausted { attempts: 5 }.to_string(),
            terminal: true,
        });
        assert!(failure.is_terminal());
        assert!(failure.as_tick().is_none());
        assert_eq!(failure.symbol().as_str(), "btcusdt");
    }

    #[test]
    fn finished_states() {
        assert!(ConnectionState::Closed.is_finished());
        assert!(ConnectionState::Failed.is_finished());
        assert!(!ConnectionState::Reconnecting.is_finished());
        assert!(!ConnectionState::Open.is_finished());
    }

    #[test]
    fn update_serialization_is_tagged() {
        let failure = PriceUpdate::Failure(StreamFailure {
            symbol: key(),
            error: "boom".to_string(),
            terminal: false,
        });
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["type"], "failure");
        assert_eq!(json["symbol"], "btcusdt");
        assert_eq!(json["terminal"], false);
    }
}
