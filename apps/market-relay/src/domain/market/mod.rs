//! Market Data Types
//!
//! Realtime events pushed to WebSocket clients and the views served from
//! the bounded cache.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {"event": "sales/add", "item": 5333, "world": 74, "sales": [...]}
//! {"event": "listings/add", "item": 5333, "world": 74, "listings": [...]}
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::deep_clone_via_clone;

// =============================================================================
// Identifiers
// =============================================================================

/// Item on a world; the unit views are cached by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewKey {
    /// Item identifier.
    pub item_id: u32,
    /// World identifier.
    pub world_id: u16,
}

impl ViewKey {
    /// Create a key.
    #[must_use]
    pub const fn new(item_id: u32, world_id: u16) -> Self {
        Self { item_id, world_id }
    }
}

impl std::fmt::Display for ViewKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.item_id, self.world_id)
    }
}

// =============================================================================
// Entries
// =============================================================================

/// A completed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleEntry {
    /// Unit price in gil.
    pub price_per_unit: u32,
    /// Units sold.
    pub quantity: u32,
    /// High-quality flag.
    pub hq: bool,
    /// Buyer character name.
    pub buyer_name: String,
    /// Time of sale.
    pub timestamp: DateTime<Utc>,
}

/// An open market board listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    /// Listing identifier.
    pub listing_id: String,
    /// Unit price in gil.
    pub price_per_unit: u32,
    /// Units listed.
    pub quantity: u32,
    /// High-quality flag.
    pub hq: bool,
    /// Retainer selling the item.
    pub retainer_name: String,
}

// =============================================================================
// Realtime Events
// =============================================================================

/// Event pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum MarketEvent {
    /// New listings were uploaded.
    #[serde(rename = "listings/add")]
    ListingsAdd {
        /// Item identifier.
        item: u32,
        /// World identifier.
        world: u16,
        /// Added listings.
        listings: Vec<Listing>,
    },
    /// Listings disappeared from the board.
    #[serde(rename = "listings/remove")]
    ListingsRemove {
        /// Item identifier.
        item: u32,
        /// World identifier.
        world: u16,
        /// Removed listings.
        listings: Vec<Listing>,
    },
    /// New sales were uploaded.
    #[serde(rename = "sales/add")]
    SalesAdd {
        /// Item identifier.
        item: u32,
        /// World identifier.
        world: u16,
        /// Added sales.
        sales: Vec<SaleEntry>,
    },
}

impl MarketEvent {
    /// Item/world this event concerns.
    #[must_use]
    pub const fn key(&self) -> ViewKey {
        match self {
            Self::ListingsAdd { item, world, .. }
            | Self::ListingsRemove { item, world, .. }
            | Self::SalesAdd { item, world, .. } => ViewKey::new(*item, *world),
        }
    }

    /// Event name as it appears on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListingsAdd { .. } => "listings/add",
            Self::ListingsRemove { .. } => "listings/remove",
            Self::SalesAdd { .. } => "sales/add",
        }
    }
}

// =============================================================================
// Cached Views
// =============================================================================

/// Sale history for one item on one world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    /// Item identifier.
    pub item_id: u32,
    /// World identifier.
    pub world_id: u16,
    /// Most recent upload for this item/world.
    pub last_upload_time: DateTime<Utc>,
    /// Sales, newest first.
    pub entries: Vec<SaleEntry>,
    /// Mean unit price across `entries`.
    pub average_price: Decimal,
}

impl HistoryView {
    /// Build a view from sales, newest first, capped at `limit` entries.
    #[must_use]
    pub fn from_sales(
        key: ViewKey,
        mut sales: Vec<SaleEntry>,
        last_upload_time: DateTime<Utc>,
        limit: usize,
    ) -> Self {
        sales.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sales.truncate(limit);

        let average_price = if sales.is_empty() {
            Decimal::ZERO
        } else {
            let total: Decimal = sales
                .iter()
                .map(|s| Decimal::from(s.price_per_unit))
                .sum();
            (total / Decimal::from(sales.len())).round_dp(2)
        };

        Self {
            item_id: key.item_id,
            world_id: key.world_id,
            last_upload_time,
            entries: sales,
            average_price,
        }
    }

    /// Key this view is cached under.
    #[must_use]
    pub const fn key(&self) -> ViewKey {
        ViewKey::new(self.item_id, self.world_id)
    }
}

deep_clone_via_clone!(ViewKey, SaleEntry, Listing, HistoryView);

// =============================================================================
// Tests
// =============================================================================
