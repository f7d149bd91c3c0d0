//! WebSocket Upstream Client
//!
//! Opens one WebSocket per symbol against the exchange's raw trade stream.
//!
//! # Stream URL
//!
//! `{base_url}/{symbol}@trade`, e.g.
//! `wss://stream.binance.com:9443/ws/btcusdt@trade`.
//!
//! Server pings are answered, client pings go out on the heartbeat interval,
//! and text frames are handed to the pool undecoded.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
use crate::application::ports::{TransportError, UpstreamConnector, UpstreamStream};
use crate::domain::symbol::SymbolKey;

/// How long `close` waits for the close frame to flush.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens trade-stream WebSockets.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: String,
    heartbeat: HeartbeatConfig,
}

impl WebSocketConnector {
    /// Create a connector for a base URL such as `wss://host:9443/ws`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, heartbeat: HeartbeatConfig) -> Self {
        Self {
            base_url: base_url.into(),
            heartbeat,
        }
    }

    /// Stream URL for a symbol key.
    #[must_use]
    pub fn stream_url(&self, symbol: &SymbolKey) -> String {
        format!("{}/{symbol}@trade", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl UpstreamConnector for WebSocketConnector {
    async fn connect(&self, symbol: &SymbolKey) -> Result<Box<dyn UpstreamStream>, TransportError> {
        let url = self.stream_url(symbol);
        tracing::info!(symbol = %symbol, url = %url, "Connecting to upstream trade stream");

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        Ok(Box::new(WebSocketSession {
            symbol: symbol.clone(),
            socket,
            heartbeat: Heartbeat::new(self.heartbeat.clone()),
        }))
    }
}

/// One open trade-stream WebSocket.
pub struct WebSocketSession {
    symbol: SymbolKey,
    socket: Socket,
    heartbeat: Heartbeat,
}

enum SessionEvent {
    Heartbeat(HeartbeatAction),
    Message(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

impl WebSocketSession {
    async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        self.socket
            .send(message)
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }
}

#[async_trait]
impl UpstreamStream for WebSocketSession {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let event = tokio::select! {
                action = self.heartbeat.tick() => SessionEvent::Heartbeat(action),
                message = self.socket.next() => SessionEvent::Message(message),
            };

            match event {
                SessionEvent::Heartbeat(HeartbeatAction::SendPing) => {
                    if let Err(e) = self.send(Message::Ping(Vec::new().into())).await {
                        return Some(Err(e));
                    }
                }
                SessionEvent::Heartbeat(HeartbeatAction::TimedOut(elapsed)) => {
                    return Some(Err(TransportError::HeartbeatTimeout(elapsed)));
                }
                SessionEvent::Message(Some(Ok(message))) => {
                    self.heartbeat.record_activity();
                    match message {
                        Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => return Some(Ok(text)),
                            Err(_) => {
                                tracing::debug!(symbol = %self.symbol, "Ignoring non-UTF-8 binary frame");
                            }
                        },
                        Message::Ping(data) => {
                            if let Err(e) = self.send(Message::Pong(data)).await {
                                return Some(Err(e));
                            }
                        }
                        Message::Close(frame) => {
                            let reason = frame.map_or_else(
                                || "no close frame".to_string(),
                                |f| format!("{} {}", f.code, f.reason),
                            );
                            tracing::info!(symbol = %self.symbol, reason = %reason, "Server sent close frame");
                            return Some(Err(TransportError::Closed(reason)));
                        }
                        Message::Pong(_) | Message::Frame(_) => {}
                    }
                }
                SessionEvent::Message(Some(Err(e))) => {
                    return Some(Err(TransportError::Socket(e.to_string())));
                }
                SessionEvent::Message(None) => {
                    tracing::info!(symbol = %self.symbol, "WebSocket stream ended");
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, self.socket.close(None)).await {
            Ok(Ok(())) => tracing::debug!(symbol = %self.symbol, "Upstream session closed"),
            Ok(Err(e)) => tracing::debug!(symbol = %self.symbol, error = %e, "Close frame not sent"),
            Err(_) => tracing::debug!(symbol = %self.symbol, "Close frame flush timed out"),
        }
    }
}
