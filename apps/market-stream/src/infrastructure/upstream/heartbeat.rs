//! Heartbeat
//!
//! Keeps an upstream WebSocket honest with periodic pings. Any inbound
//! traffic counts as proof of life; if nothing arrives within the pong
//! timeout after a ping was sent, the session is considered dead.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::infrastructure::config::UpstreamSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Timeout for pong response before connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

impl From<&UpstreamSettings> for HeartbeatConfig {
    fn from(settings: &UpstreamSettings) -> Self {
        Self::new(settings.heartbeat_interval, settings.heartbeat_timeout)
    }
}

/// What the session should do after a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame.
    SendPing,
    /// Nothing arrived in time; the session is dead.
    TimedOut(Duration),
}

/// Per-session heartbeat timer.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    interval: Interval,
    last_activity: Instant,
    awaiting_pong: bool,
}

impl Heartbeat {
    /// Start a heartbeat; the first ping goes out one interval from now.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let now = Instant::now();
        let mut interval = tokio::time::interval_at(now + config.ping_interval, config.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            config,
            interval,
            last_activity: now,
            awaiting_pong: false,
        }
    }

    /// Wait for the next tick.
    ///
    /// Cancel-safe, so it can sit in a `select!` next to the socket read.
    pub async fn tick(&mut self) -> HeartbeatAction {
        self.interval.tick().await;

        if self.awaiting_pong {
            let elapsed = self.last_activity.elapsed();
            if elapsed > self.config.pong_timeout {
                tracing::warn!(
                    elapsed_secs = elapsed.as_secs(),
                    timeout_secs = self.config.pong_timeout.as_secs(),
                    "Heartbeat timeout detected"
                );
                return HeartbeatAction::TimedOut(elapsed);
            }
        }

        self.awaiting_pong = true;
        HeartbeatAction::SendPing
    }

    /// Record inbound traffic (data, ping or pong).
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.awaiting_pong = false;
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }
}
