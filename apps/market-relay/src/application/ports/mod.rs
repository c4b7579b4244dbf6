//! Port Interfaces
//!
//! Contracts infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: framed, ordered byte delivery to one connected client
//! - `ViewSource`: the store views are computed from on a cache miss

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::market::{HistoryView, ViewKey};

// =============================================================================
// Transport
// =============================================================================

/// Errors raised by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection is no longer open.
    #[error("transport closed")]
    Closed,

    /// A frame could not be written.
    #[error("send failed: {0}")]
    Send(String),

    /// The close handshake failed.
    #[error("close failed: {0}")]
    Close(String),
}

/// Outbound side of one client connection.
///
/// A message may span several frames; only the last one is sent with
/// `is_final` set. Callers never interleave frames of different messages.
#[async_trait]
pub trait Transport: Send {
    /// Write one frame, suspending until it is handed to the connection.
    async fn send(&mut self, frame: &[u8], is_final: bool) -> Result<(), TransportError>;

    /// Start and complete a graceful close.
    async fn close(&mut self, reason: &str) -> Result<(), TransportError>;

    /// Whether the connection can still carry frames.
    fn is_open(&self) -> bool;
}

// =============================================================================
// View Source
// =============================================================================

/// Errors raised by a [`ViewSource`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The backing store could not be reached.
    #[error("view source unavailable: {0}")]
    Unavailable(String),
}

/// Backing store consulted when a view is not cached.
#[async_trait]
pub trait ViewSource: Send + Sync {
    /// Build the sale history view for `key`, or `None` if nothing is known.
    async fn fetch_history(&self, key: ViewKey) -> Result<Option<HistoryView>, SourceError>;
}

#[async_trait]
impl<S: ViewSource + ?Sized> ViewSource for Arc<S> {
    async fn fetch_history(&self, key: ViewKey) -> Result<Option<HistoryView>, SourceError> {
        (**self).fetch_history(key).await
    }
}
