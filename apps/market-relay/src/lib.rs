#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::cast_possible_truncation,
        clippy::items_after_statements
    )
)]

//! Market Relay - Realtime Market Board Delivery
//!
//! Caches computed market views in a bounded CLOCK cache and pushes market
//! events to WebSocket clients, each through its own bounded, lossy,
//! enqueue-ordered delivery queue drained by a single send loop.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core data structures with no I/O
//!   - `cache`: Bounded cache with copy isolation and CLOCK eviction
//!   - `delivery`: Per-connection priority queue and loop state
//!   - `market`: Events and cached views
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Client transport and view source interfaces
//!   - `services`: Connection delivery loop, cached market views
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `websocket`: `tokio-tungstenite` server and transport
//!   - `registry`: Live connections and event fan-out
//!   - `store`: In-memory sales store
//!   - `config`: Environment configuration
//!   - `health`: Health, metrics and upload HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! POST /events ──► store.record ──► views.invalidate
//!        │
//!        └──► registry.publish ──► queue (≤ limit) ──► send loop ──► Client 1
//!                                ──► queue (≤ limit) ──► send loop ──► Client N
//!
//! GET /history ──► views.history ──► cache hit? copy : store ──► cache.set
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core data structures with no external I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{BoundedCache, CacheError, CacheStats, CloneError, DeepClone, JsonSnapshot};
pub use domain::delivery::{DeliveryError, DeliveryQueue, LoopState};
pub use domain::market::{HistoryView, Listing, MarketEvent, SaleEntry, ViewKey};

// Application
pub use application::ports::{SourceError, Transport, TransportError, ViewSource};
pub use application::services::{ConnectionClient, DeliveryConfig, MarketViewService, ViewError};

// Infrastructure config
pub use infrastructure::config::{
    CacheSettings, ConfigError, DeliverySettings, Environment, RelayConfig, ServerSettings,
};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::registry::{ConnectionId, ConnectionRegistry};
pub use infrastructure::store::InMemorySalesStore;
pub use infrastructure::websocket::{
    WebSocketRegistry, WebSocketServer, WebSocketServerError, WebSocketTransport,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
