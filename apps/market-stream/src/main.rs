//! Market Stream Binary
//!
//! Starts the connection pool, watches the configured symbols, and serves
//! health, stats and cached prices over HTTP.
//!
//! # Usage
//!
//! ```bash
//! MARKET_STREAM_SYMBOLS=BTCUSDT,eth-usdt cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_STREAM_BASE_URL`: Upstream WebSocket base URL
//! - `MARKET_STREAM_SYMBOLS`: Comma-separated symbols to watch (default: none)
//! - `MARKET_STREAM_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `MARKET_STREAM_GRACE_PERIOD_MS`: Idle connection grace period (default: 5000)
//! - `MARKET_STREAM_MAX_RECONNECT_ATTEMPTS`: Failures before giving up (default: 5)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use market_stream::infrastructure::health::{HealthServer, HealthServerState};
use market_stream::infrastructure::telemetry;
use market_stream::{
    ConnectionPool, HeartbeatConfig, PoolConfig, PriceUpdate, StreamConfig, Subscription,
    TracingLifecycleSink, WebSocketConnector, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Stream");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = StreamConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let connector = Arc::new(WebSocketConnector::new(
        config.upstream.base_url.clone(),
        HeartbeatConfig::from(&config.upstream),
    ));
    let pool = Arc::new(ConnectionPool::new(
        PoolConfig::from(&config),
        connector,
        Arc::new(TracingLifecycleSink),
    ));

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&pool),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let subscriptions = watch_symbols(&pool, &config)?;

    tracing::info!(watched = subscriptions.len(), "Market stream ready");

    await_shutdown(shutdown_token).await;

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    pool.disconnect_all();

    tracing::info!("Market stream stopped");
    Ok(())
}

/// Subscribe a logging handler to every configured symbol.
fn watch_symbols(
    pool: &ConnectionPool,
    config: &StreamConfig,
) -> Result<Vec<Subscription>, Box<dyn std::error::Error>> {
    let mut subscriptions = Vec::with_capacity(config.symbols.len());

    for symbol in &config.symbols {
        let subscription = pool.subscribe(symbol.as_str(), log_update)?;
        subscriptions.push(subscription);
    }

    Ok(subscriptions)
}

#[allow(clippy::unnecessary_wraps)]
fn log_update(update: &PriceUpdate) -> anyhow::Result<()> {
    match update {
        PriceUpdate::Tick(tick) => {
            tracing::debug!(
                symbol = %tick.symbol,
                price = %tick.price,
                cached = tick.cached,
                "Price"
            );
        }
        PriceUpdate::Failure(failure) => {
            tracing::error!(
                symbol = %failure.symbol,
                error = %failure.error,
                terminal = failure.terminal,
                "Stream failed"
            );
        }
    }
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        base_url = %config.upstream.base_url,
        health_port = config.server.health_port,
        symbols = config.symbols.len(),
        grace_period_ms = u64::try_from(config.pool.grace_period.as_millis()).unwrap_or(u64::MAX),
        max_reconnect_attempts = config.pool.max_reconnect_attempts,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
