//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// WebSocket server and transport.
pub mod websocket;

/// Live connection registry and fan-out.
pub mod registry;

/// In-memory view source.
pub mod store;

/// Configuration loading.
pub mod config;

/// Health, metrics and upload HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
