//! Health, Metrics and Upload Endpoint
//!
//! HTTP endpoint for health checks, Prometheus metrics and the upload
//! surface that feeds the realtime relay.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `POST /events` - Record a market event and publish it to clients
//! - `GET /history/{item}/{world}` - Cached sale history view

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::MarketViewService;
use crate::domain::cache::CacheStats;
use crate::domain::market::{MarketEvent, ViewKey};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::store::InMemorySalesStore;
use crate::infrastructure::websocket::WebSocketRegistry;

/// View service backed by the in-memory store.
pub type SharedViews = Arc<MarketViewService<Arc<InMemorySalesStore>>>;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Live WebSocket connections.
    pub connections: usize,
    /// View cache statistics.
    pub cache: CacheStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting connections and uploads.
    Healthy,
    /// Shutting down.
    Draining,
}

/// View cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// Cached views.
    pub entries: usize,
    /// Maximum cached views.
    pub capacity: usize,
    /// Lookups answered from cache.
    pub hits: u64,
    /// Lookups that went to the store.
    pub misses: u64,
    /// Views evicted to make room.
    pub evictions: u64,
}

impl From<CacheStats> for CacheStatus {
    fn from(stats: CacheStats) -> Self {
        Self {
            entries: stats.entries,
            capacity: stats.capacity,
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
        }
    }
}

/// Response to an accepted upload.
#[derive(Debug, Clone, Serialize)]
pub struct PublishResponse {
    /// Connections the event was queued on.
    pub delivered: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: Arc<WebSocketRegistry>,
    store: Arc<InMemorySalesStore>,
    views: SharedViews,
    shutdown: CancellationToken,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        registry: Arc<WebSocketRegistry>,
        store: Arc<InMemorySalesStore>,
        views: SharedViews,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            store,
            views,
            shutdown,
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

/// Build the HTTP routes.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/events", post(publish_handler))
        .route("/history/{item}/{world}", get(history_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Draining => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
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

async fn publish_handler(
    State(state): State<Arc<HealthServerState>>,
    Json(event): Json<MarketEvent>,
) -> impl IntoResponse {
    state.store.record(&event);
    state.views.invalidate(event.key());
    let delivered = state.registry.publish(&event);
    (StatusCode::ACCEPTED, Json(PublishResponse { delivered }))
}

async fn history_handler(
    State(state): State<Arc<HealthServerState>>,
    Path((item, world)): Path<(u32, u16)>,
) -> Response {
    let key = ViewKey::new(item, world);
    match state.views.history(key).await {
        Ok(Some(view)) => (StatusCode::OK, Json(view)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(key = %key, error = %e, "Failed to load history view");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let status = if state.shutdown.is_cancelled() {
        HealthStatus::Draining
    } else {
        HealthStatus::Healthy
    };

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connections: state.registry.len(),
        cache: state.views.cache_stats().into(),
    }
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
