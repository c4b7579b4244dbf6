//! Market Relay Binary
//!
//! Starts the realtime WebSocket relay and its HTTP endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-relay
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_RELAY_ENV`: development | production (default: development)
//! - `MARKET_RELAY_WS_PORT`: WebSocket server port (default: 4002)
//! - `MARKET_RELAY_HEALTH_PORT`: Health/metrics/upload HTTP port (default: 8083)
//! - `MARKET_RELAY_CACHE_CAPACITY`: Cached market views (default: 2000)
//! - `MARKET_RELAY_QUEUE_LIMIT`: Pending messages per client (default: 30)
//! - `MARKET_RELAY_MAX_FRAME_BYTES`: WebSocket frame size (default: 131072)
//! - `MARKET_RELAY_CLOSE_REASON`: Close handshake reason (default: "closing socket")
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-relay)
//! - `RUST_LOG`: Log filter (default: `market_relay=info`)

use std::sync::Arc;
use std::time::Duration;

use market_relay::infrastructure::health::{HealthServer, HealthServerState};
use market_relay::infrastructure::telemetry;
use market_relay::{
    ConnectionRegistry, DeliveryConfig, InMemorySalesStore, MarketViewService, RelayConfig,
    WebSocketServer, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time allowed for connections to finish their close handshakes.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting market relay");

    let _metrics_handle = init_metrics()?;

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store = Arc::new(InMemorySalesStore::default());
    let views = Arc::new(MarketViewService::new(
        Arc::clone(&store),
        config.cache.capacity,
    ));
    let registry = Arc::new(ConnectionRegistry::new());

    // Health, metrics and uploads
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
        store,
        views,
        shutdown_token.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Realtime WebSocket feed
    let ws_server = WebSocketServer::new(
        Arc::clone(&registry),
        DeliveryConfig::from(config.delivery.clone()),
        shutdown_token.clone(),
    );
    let ws_port = config.server.ws_port;
    let ws_task = tokio::spawn(async move {
        if let Err(e) = ws_server.run(ws_port).await {
            tracing::error!(error = %e, "WebSocket server error");
        }
    });

    tracing::info!("Market relay ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(health_task, ws_task);
        registry.drained().await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            connections = registry.len(),
            "Shutdown timed out with connections still open"
        );
    }

    tracing::info!("Market relay stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        cache_capacity = config.cache.capacity,
        queue_limit = config.delivery.queue_limit,
        max_frame_bytes = config.delivery.max_frame_bytes,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
