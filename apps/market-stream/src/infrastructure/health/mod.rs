//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, pool introspection, cached prices, and
//! Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status with pool stats
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (every connection open)
//! - `GET /stats` - JSON pool stats
//! - `GET /prices/{symbol}` - Last cached price for a symbol
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ConnectionPool, PoolStats};
use crate::domain::streaming::ConnectionState;
use crate::domain::symbol::SymbolKey;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Pool snapshot.
    pub pool: PoolStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No connection is reconnecting.
    Healthy,
    /// At least one connection is waiting to reconnect.
    Degraded,
}

impl HealthStatus {
    /// Derive the status from a pool snapshot.
    #[must_use]
    pub fn from_stats(stats: &PoolStats) -> Self {
        if stats.is_degraded() {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}

/// Cached price lookup result.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PriceResponse {
    /// A price is cached.
    Known {
        /// Normalized symbol key.
        symbol: SymbolKey,
        /// Last trade price, as a string.
        price: String,
        /// Upstream event time.
        timestamp: DateTime<Utc>,
    },
    /// Nothing cached yet.
    Unknown {
        /// Normalized symbol key.
        symbol: SymbolKey,
    },
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    pool: Arc<ConnectionPool>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, pool: Arc<ConnectionPool>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            pool,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/stats", get(stats_handler))
        .route("/prices/{symbol}", get(price_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let pool = state.pool.stats();
    let response = HealthResponse {
        status: HealthStatus::from_stats(&pool),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        pool,
    };
    (StatusCode::OK, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Ready when every tracked connection is open; otherwise lists the rest.
async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let stats = state.pool.stats();
    if stats.all_open() {
        return (StatusCode::OK, "READY".to_string());
    }

    let pending: Vec<String> = stats
        .connections
        .iter()
        .filter(|c| c.state != ConnectionState::Open)
        .map(|c| format!("{}={}", c.symbol, c.state.as_str()))
        .collect();
    (
        StatusCode::SERVICE_UNAVAILABLE,
        format!("NOT READY: {}", pending.join(", ")),
    )
}

async fn stats_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.pool.stats())
}

async fn price_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(symbol): Path<String>,
) -> Response {
    let key = match SymbolKey::parse(&symbol) {
        Ok(key) => key,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state.pool.price_cache().get(&key) {
        Some(cached) => (
            StatusCode::OK,
            Json(PriceResponse::Known {
                symbol: key,
                price: cached.price.to_string(),
                timestamp: cached.timestamp,
            }),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, Json(PriceResponse::Unknown { symbol: key })).into_response(),
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::future;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::application::ports::{
        LifecycleEvent, LifecycleSink, TransportError, UpstreamConnector, UpstreamStream,
    };
    use crate::application::services::{ConnectionStats, PoolConfig};
    use crate::domain::streaming::ConnectionState;

    struct PendingConnector;

    #[async_trait]
    impl UpstreamConnector for PendingConnector {
        async fn connect(
            &self,
            _symbol: &SymbolKey,
        ) -> Result<Box<dyn UpstreamStream>, TransportError> {
            future::pending().await
        }
    }

    struct QuietSink;

    impl LifecycleSink for QuietSink {
        fn record(&self, _event: &LifecycleEvent) {}
    }

    fn state() -> Arc<HealthServerState> {
        let pool = ConnectionPool::new(
            PoolConfig::default(),
            Arc::new(PendingConnector),
            Arc::new(QuietSink),
        );
        Arc::new(HealthServerState::new("0.1.0".to_string(), Arc::new(pool)))
    }

    async fn get(state: Arc<HealthServerState>, uri: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn connection(state: ConnectionState) -> ConnectionStats {
        ConnectionStats {
            symbol: SymbolKey::parse("btcusdt").unwrap(),
            connection_id: Uuid::nil(),
            state,
            subscribers: 1,
            reconnect_attempts: 0,
        }
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn reconnecting_connection_degrades_status() {
        let mut stats = PoolStats {
            active_connections: 1,
            connections_created: 1,
            cached_prices: 0,
            connections: vec![connection(ConnectionState::Open)],
        };
        assert_eq!(HealthStatus::from_stats(&stats), HealthStatus::Healthy);

        stats.connections[0].state = ConnectionState::Reconnecting;
        assert_eq!(HealthStatus::from_stats(&stats), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn liveness_is_ok() {
        let (status, body) = get(state(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn health_reports_pool() {
        let (status, body) = get(state(), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "0.1.0");
        assert_eq!(json["pool"]["active_connections"], 0);
    }

    #[tokio::test]
    async fn readiness_requires_open_connections() {
        let state = state();
        let (status, _) = get(Arc::clone(&state), "/readyz").await;
        assert_eq!(status, StatusCode::OK);

        let _subscription = state
            .pool
            .subscribe("btcusdt", |_: &crate::domain::streaming::PriceUpdate| -> anyhow::Result<()> {
                Ok(())
            })
            .unwrap();
        let (status, body) = get(Arc::clone(&state), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "NOT READY: btcusdt=connecting");

        let (_, body) = get(state, "/stats").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["connections"][0]["symbol"], "btcusdt");
        assert_eq!(json["connections"][0]["state"], "connecting");
    }

    #[tokio::test]
    async fn price_lookup() {
        let state = state();
        let timestamp = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        state.pool.price_cache().put(
            SymbolKey::parse("btcusdt").unwrap(),
            Decimal::new(650_005, 1),
            timestamp,
        );

        let (status, body) = get(Arc::clone(&state), "/prices/BTC-USDT").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "known");
        assert_eq!(json["price"], "65000.5");

        let (status, body) = get(Arc::clone(&state), "/prices/ethusdt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "unknown");

        let (status, _) = get(state, "/prices/---").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
