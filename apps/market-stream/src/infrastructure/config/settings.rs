//! Stream Configuration Settings
//!
//! Configuration types for the market stream service, loaded from
//! environment variables.

use std::time::Duration;

use crate::application::services::{PoolConfig, ReconnectConfig};
use crate::domain::symbol::SymbolKey;

/// Default upstream endpoint (raw trade streams).
pub const DEFAULT_BASE_URL: &str = "wss://stream.binance.com:9443/ws";

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// WebSocket base URL; the stream path is appended per symbol.
    pub base_url: String,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// How long an unused connection is kept for a returning subscriber.
    pub grace_period: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Consecutive failures before a connection gives up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Buffered updates per stream subscriber.
    pub buffer_capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(5_000),
            reconnect_delay_initial: Duration::from_millis(1_000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 5,
            buffer_capacity: 1024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// Connection pool settings.
    pub pool: PoolSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Symbols the binary watches at startup.
    pub symbols: Vec<SymbolKey>,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Self::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unset or unparsable numeric values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not a WebSocket URL, a heartbeat
    /// or connect timeout is zero, or a watched symbol is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let upstream_defaults = UpstreamSettings::default();
        let pool_defaults = PoolSettings::default();

        let base_url = env
            .get("MARKET_STREAM_BASE_URL")
            .unwrap_or(upstream_defaults.base_url);
        if !(base_url.starts_with("ws://") || base_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                key: "MARKET_STREAM_BASE_URL".to_string(),
                reason: format!("expected ws:// or wss:// URL, got {base_url}"),
            });
        }

        let upstream = UpstreamSettings {
            base_url,
            heartbeat_interval: env.nonzero_secs(
                "MARKET_STREAM_HEARTBEAT_INTERVAL_SECS",
                upstream_defaults.heartbeat_interval,
            )?,
            heartbeat_timeout: env.nonzero_secs(
                "MARKET_STREAM_HEARTBEAT_TIMEOUT_SECS",
                upstream_defaults.heartbeat_timeout,
            )?,
            connect_timeout: env.nonzero_secs(
                "MARKET_STREAM_CONNECT_TIMEOUT_SECS",
                upstream_defaults.connect_timeout,
            )?,
        };

        let pool = PoolSettings {
            grace_period: env.duration_millis(
                "MARKET_STREAM_GRACE_PERIOD_MS",
                pool_defaults.grace_period,
            ),
            reconnect_delay_initial: env.duration_millis(
                "MARKET_STREAM_RECONNECT_DELAY_INITIAL_MS",
                pool_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "MARKET_STREAM_RECONNECT_DELAY_MAX_SECS",
                pool_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "MARKET_STREAM_RECONNECT_DELAY_MULTIPLIER",
                pool_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "MARKET_STREAM_MAX_RECONNECT_ATTEMPTS",
                pool_defaults.max_reconnect_attempts,
            ),
            buffer_capacity: env.parse(
                "MARKET_STREAM_BUFFER_CAPACITY",
                pool_defaults.buffer_capacity,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse(
                "MARKET_STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let symbols = env
            .get("MARKET_STREAM_SYMBOLS")
            .map(|raw| parse_symbols(&raw))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            upstream,
            pool,
            server,
            symbols,
        })
    }
}

impl From<&PoolSettings> for ReconnectConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.0,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

impl From<&StreamConfig> for PoolConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            grace_period: config.pool.grace_period,
            connect_timeout: config.upstream.connect_timeout,
            stream_buffer: config.pool.buffer_capacity,
            reconnect: ReconnectConfig::from(&config.pool),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_symbols(raw: &str) -> Result<Vec<SymbolKey>, ConfigError> {
    let mut symbols: Vec<SymbolKey> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let key = SymbolKey::parse(entry).map_err(|e| ConfigError::InvalidValue {
            key: "MARKET_STREAM_SYMBOLS".to_string(),
            reason: e.to_string(),
        })?;
        if !symbols.contains(&key) {
            symbols.push(key);
        }
    }
    Ok(symbols)
}

/// Typed access to string settings.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    /// Like [`Self::duration_secs`], but an explicit zero is an error.
    fn nonzero_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let value = self.duration_secs(key, default);
        if value.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: "must be at least one second".to_string(),
            });
        }
        Ok(value)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
