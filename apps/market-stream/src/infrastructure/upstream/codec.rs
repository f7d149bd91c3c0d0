//! Trade Frame Codec
//!
//! Decodes upstream text frames into trades. Non-trade events and control
//! responses decode to `None`; anything malformed is a [`FrameParseError`]
//! that the pool logs and discards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use super::messages::{StreamEnvelope, TRADE_EVENT, TradeMessage};

/// Frame decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameParseError {
    /// The frame is not valid JSON or does not match the trade schema.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is JSON but not an event object.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),

    /// The trade carries a negative price.
    #[error("negative price {0}")]
    NegativePrice(Decimal),
}

/// A decoded trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeFrame {
    /// Exchange symbol as sent upstream.
    pub symbol: String,
    /// Trade price.
    pub price: Decimal,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

impl From<TradeMessage> for TradeFrame {
    fn from(message: TradeMessage) -> Self {
        Self {
            symbol: message.symbol,
            price: message.price,
            timestamp: message.event_time,
        }
    }
}

/// JSON codec for the trade stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TradeCodec;

impl TradeCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// Returns `Ok(None)` for events that are not trades and for control
    /// responses such as `{"result":null,"id":1}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, is not an object, or is a
    /// trade that does not match the schema.
    pub fn decode(&self, text: &str) -> Result<Option<TradeFrame>, FrameParseError> {
        let value: Value = serde_json::from_str(text.trim())?;
        let payload = Self::unwrap_envelope(value)?;

        let Some(object) = payload.as_object() else {
            return Err(FrameParseError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                truncate(text, 50)
            )));
        };

        match object.get("e").and_then(Value::as_str) {
            Some(TRADE_EVENT) => {
                let message: TradeMessage = serde_json::from_value(payload)?;
                if message.price.is_sign_negative() {
                    return Err(FrameParseError::NegativePrice(message.price));
                }
                Ok(Some(message.into()))
            }
            Some(other) => {
                tracing::trace!(event_type = other, "Ignoring non-trade event");
                Ok(None)
            }
            None if object.contains_key("result") || object.contains_key("id") => Ok(None),
            None => Err(FrameParseError::InvalidFormat(format!(
                "missing event type: {}",
                truncate(text, 50)
            ))),
        }
    }

    /// Strip a combined-stream envelope, if present.
    fn unwrap_envelope(value: Value) -> Result<Value, FrameParseError> {
        if value.get("stream").is_none() {
            return Ok(value);
        }
        let envelope: StreamEnvelope = serde_json::from_value(value)?;
        Ok(envelope.data)
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(index, _)| &text[..index])
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    const TRADE: &str =
        r#"{"e":"trade","E":1718000000123,"s":"BTCUSDT","t":1,"p":"65000.5","q":"0.1","m":false}"#;

    #[test]
    fn decodes_trade() {
        let frame = TradeCodec::new().decode(TRADE).unwrap().unwrap();

        assert_eq!(frame.symbol, "BTCUSDT");
        assert_eq!(frame.price, Decimal::new(650_005, 1));
        assert_eq!(frame.timestamp.timestamp_millis(), 1_718_000_000_123);
    }

    #[test]
    fn decodes_enveloped_trade() {
        let text = format!(r#"{{"stream":"btcusdt@trade","data":{TRADE}}}"#);
        let frame = TradeCodec::new().decode(&text).unwrap().unwrap();

        assert_eq!(frame.symbol, "BTCUSDT");
        assert_eq!(frame.price, Decimal::new(650_005, 1));
    }

    #[test_case(r#"{"e":"aggTrade","E":1,"s":"BTCUSDT","p":"1"}"# ; "other event type")]
    #[test_case(r#"{"result":null,"id":1}"# ; "control response")]
    #[test_case(r#"{"stream":"btcusdt@depth","data":{"e":"depthUpdate"}}"# ; "enveloped other event")]
    fn ignores_non_trade_frames(text: &str) {
        assert_eq!(TradeCodec::new().decode(text).unwrap(), None);
    }

    #[test_case("not json" ; "garbage")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case(r#"{"foo":"bar"}"# ; "missing event type")]
    #[test_case(r#"{"e":"trade","E":1,"s":"BTCUSDT"}"# ; "missing price")]
    #[test_case(r#"{"e":"trade","E":1,"s":"BTCUSDT","p":"abc"}"# ; "invalid price")]
    #[test_case(r#"{"e":"trade","E":"later","s":"BTCUSDT","p":"1"}"# ; "invalid timestamp")]
    #[test_case(r#"{"stream":"btcusdt@trade"}"# ; "envelope without data")]
    fn rejects_malformed_frames(text: &str) {
        assert!(TradeCodec::new().decode(text).is_err());
    }

    #[test]
    fn rejects_negative_price() {
        let text = r#"{"e":"trade","E":1,"s":"BTCUSDT","p":"-1.5"}"#;
        let error = TradeCodec::new().decode(text).unwrap_err();
        assert!(matches!(error, FrameParseError::NegativePrice(_)));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 50), "short");
    }
}
