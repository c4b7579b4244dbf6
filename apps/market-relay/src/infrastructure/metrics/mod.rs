//! Prometheus Metrics Module
//!
//! Exposes relay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Delivery**: messages sent, discarded on overflow, send failures
//! - **Connections**: live WebSocket clients
//! - **Cache**: view lookups by result
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use parking_lot::{Mutex, const_mutex};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
// Serializes recorder installation; the global recorder can only be set once.
static INSTALL_LOCK: Mutex<()> = const_mutex(());

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let _install = INSTALL_LOCK.lock();
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

const DISCARDED_MESSAGES: &str = "market_relay_ws_discarded_messages";
const MESSAGES_SENT: &str = "market_relay_messages_sent_total";
const BYTES_SENT: &str = "market_relay_bytes_sent_total";
const SEND_FAILURES: &str = "market_relay_send_failures_total";
const CONNECTIONS: &str = "market_relay_connections";
const CACHE_LOOKUPS: &str = "market_relay_cache_lookups_total";

fn register_metrics() {
    // Delivery
    describe_histogram!(
        DISCARDED_MESSAGES,
        "Pending messages dropped by a single push to a full queue"
    );
    describe_counter!(MESSAGES_SENT, "Messages fully written to clients");
    describe_counter!(BYTES_SENT, "Encoded message bytes written to clients");
    describe_counter!(
        SEND_FAILURES,
        "Delivery loops aborted by a transport write error"
    );

    // Connections
    describe_gauge!(CONNECTIONS, "Number of live WebSocket connections");

    // Cache
    describe_counter!(CACHE_LOOKUPS, "Market view cache lookups by result");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Cache lookup outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    /// Served from cache.
    Hit,
    /// Computed from the source.
    Miss,
}

impl LookupResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
        }
    }
}

impl From<bool> for LookupResult {
    fn from(hit: bool) -> Self {
        if hit { Self::Hit } else { Self::Miss }
    }
}

/// Record messages dropped by one push to a full delivery queue.
#[allow(clippy::cast_precision_loss)]
pub fn record_messages_discarded(count: usize) {
    histogram!(DISCARDED_MESSAGES).record(count as f64);
}

/// Record one message written to a client.
pub fn record_message_sent(bytes: usize) {
    counter!(MESSAGES_SENT).increment(1);
    counter!(BYTES_SENT).increment(bytes as u64);
}

/// Record a delivery loop aborted by a write error.
pub fn record_send_failure() {
    counter!(SEND_FAILURES).increment(1);
}

/// Update the live connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections(count: usize) {
    gauge!(CONNECTIONS).set(count as f64);
}

/// Record a market view cache lookup.
pub fn record_cache_lookup(hit: bool) {
    counter!(
        CACHE_LOOKUPS,
        "result" => LookupResult::from(hit).as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
