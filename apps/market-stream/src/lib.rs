#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Stream - Per-Symbol Price Stream Pool
//!
//! Keeps at most one upstream trade stream per normalized symbol, fans each
//! price update out to every subscriber of that symbol, caches the last
//! price for replay on subscribe, and reconnects with bounded exponential
//! backoff when the upstream drops.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core streaming logic and data types
//!   - `symbol`: Symbol key normalization
//!   - `streaming`: Price updates and connection states
//!   - `pricing`: Last-known price cache
//!   - `subscription`: Per-connection subscriber registry
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Consumer handlers, upstream transport, lifecycle sink
//!   - `services`: Connection pool and reconnect policy
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: WebSocket connector, trade codec, heartbeat
//!   - `config`: Environment configuration
//!   - `health`: Health, stats and price HTTP endpoint
//!   - `metrics` / `telemetry`: Prometheus and tracing
//!
//! # Data Flow
//!
//! ```text
//!                          +------------------+
//! upstream ws (btcusdt) -->|                  |--> handler 1
//!                          |  ConnectionPool  |--> handler 2
//! upstream ws (ethusdt) -->|  + PriceCache    |--> PriceStream
//!                          +------------------+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::pricing::{CachedPrice, PriceCache};
pub use domain::streaming::{ConnectionState, PriceTick, PriceUpdate, StreamFailure};
pub use domain::subscription::SubscriptionId;
pub use domain::symbol::{SymbolError, SymbolKey};

// Ports
pub use application::ports::{
    LifecycleEvent, LifecycleSink, PriceHandler, TeardownReason, TransportError,
    UpstreamConnector, UpstreamStream,
};

// Pool
pub use application::services::{
    ConnectionPool, ConnectionStats, PoolConfig, PoolStats, PriceStream, ReconnectConfig,
    SubscribeError, Subscription, Unsubscribe,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, PoolSettings, ServerSettings, StreamConfig, UpstreamSettings,
};

// Upstream adapter
pub use infrastructure::upstream::{HeartbeatConfig, WebSocketConnector};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryGuard, TracingLifecycleSink, init as init_telemetry,
};
