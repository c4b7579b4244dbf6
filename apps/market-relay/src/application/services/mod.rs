//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ConnectionClient`: per-connection queue and send loop
//! - `MarketViewService`: cached compute-or-fetch market views

mod delivery;
mod market_views;

pub use delivery::{
    ConnectionClient, DEFAULT_CLOSE_REASON, DEFAULT_MAX_FRAME_BYTES, DEFAULT_QUEUE_LIMIT,
    DeliveryConfig,
};
pub use market_views::{DEFAULT_CACHE_CAPACITY, MarketViewService, ViewError};
