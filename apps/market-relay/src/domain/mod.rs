//! Domain Layer - Core relay types and resource managers.
//!
//! This layer holds the bounded cache, the per-connection delivery queue
//! and the market data types that flow through them. Nothing here performs
//! I/O.

/// Bounded clock cache with copy-isolated values.
pub mod cache;

/// Per-connection delivery queue and loop state.
pub mod delivery;

/// Market events and cached views.
pub mod market;
