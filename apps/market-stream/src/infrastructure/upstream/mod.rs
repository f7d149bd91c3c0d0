//! Upstream Trade Stream Adapter
//!
//! WebSocket implementation of the upstream ports: one socket per symbol
//! key, heartbeat supervision, and the JSON codec for trade frames.

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod messages;

pub use client::{WebSocketConnector, WebSocketSession};
pub use codec::{FrameParseError, TradeCodec, TradeFrame};
pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
pub use messages::TradeMessage;
