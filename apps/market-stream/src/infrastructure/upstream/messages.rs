//! Upstream Wire Messages
//!
//! Wire format types for the exchange's trade stream.
//!
//! # Wire Format (JSON)
//!
//! Single-stream endpoints send the event object directly:
//!
//! ```json
//! {"e":"trade","E":1718000000123,"s":"BTCUSDT","t":12345,"p":"65000.50","q":"0.010","T":1718000000120,"m":true}
//! ```
//!
//! Combined-stream endpoints wrap it in an envelope:
//!
//! ```json
//! {"stream":"btcusdt@trade","data":{"e":"trade",...}}
//! ```
//!
//! Unknown fields are ignored.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Event type tag for trade events.
pub const TRADE_EVENT: &str = "trade";

/// A single trade event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeMessage {
    /// Event type (`"trade"`).
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (milliseconds since the epoch on the wire).
    #[serde(rename = "E", with = "chrono::serde::ts_milliseconds")]
    pub event_time: DateTime<Utc>,

    /// Exchange symbol (e.g., "BTCUSDT").
    #[serde(rename = "s")]
    pub symbol: String,

    /// Trade id.
    #[serde(rename = "t", default)]
    pub trade_id: Option<u64>,

    /// Trade price, sent as a decimal string.
    #[serde(rename = "p")]
    pub price: Decimal,

    /// Trade quantity.
    #[serde(rename = "q", default)]
    pub quantity: Option<Decimal>,

    /// Whether the buyer was the maker.
    #[serde(rename = "m", default)]
    pub buyer_is_maker: Option<bool>,
}

/// Combined-stream envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    /// Stream name (e.g., "btcusdt@trade").
    pub stream: String,
    /// Wrapped event.
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_trade() {
        let json = r#"{"e":"trade","E":1718000000123,"s":"BTCUSDT","t":12345,"p":"65000.50","q":"0.010","T":1718000000120,"m":true,"M":true}"#;
        let trade: TradeMessage = serde_json::from_str(json).unwrap();

        assert_eq!(trade.event_type, TRADE_EVENT);
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.trade_id, Some(12345));
        assert_eq!(trade.price, Decimal::new(6_500_050, 2));
        assert_eq!(trade.event_time.timestamp_millis(), 1_718_000_000_123);
        assert_eq!(trade.buyer_is_maker, Some(true));
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let json = r#"{"e":"trade","E":1,"s":"ETHUSDT","p":"3500"}"#;
        let trade: TradeMessage = serde_json::from_str(json).unwrap();

        assert_eq!(trade.trade_id, None);
        assert_eq!(trade.quantity, None);
        assert_eq!(trade.price, Decimal::from(3500));
    }

    #[test]
    fn deserialize_envelope() {
        let json = r#"{"stream":"btcusdt@trade","data":{"e":"trade"}}"#;
        let envelope: StreamEnvelope = serde_json::from_str(json).unwrap();

        assert_eq!(envelope.stream, "btcusdt@trade");
        assert_eq!(envelope.data["e"], "trade");
    }
}
