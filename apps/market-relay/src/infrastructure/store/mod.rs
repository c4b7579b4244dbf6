//! In-Memory Sales Store
//!
//! [`ViewSource`] over uploaded events held in process memory. Keeps the
//! newest sales per item/world up to a fixed bound.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::{SourceError, ViewSource};
use crate::domain::market::{HistoryView, MarketEvent, SaleEntry, ViewKey};

/// Default sales retained per item/world.
pub const DEFAULT_SALES_PER_KEY: usize = 100;

#[derive(Debug)]
struct MarketRecord {
    sales: VecDeque<SaleEntry>,
    last_upload_time: DateTime<Utc>,
}

/// Sales and upload times recorded from market events.
#[derive(Debug)]
pub struct InMemorySalesStore {
    markets: RwLock<HashMap<ViewKey, MarketRecord>>,
    sales_per_key: usize,
}

impl Default for InMemorySalesStore {
    fn default() -> Self {
        Self::new(DEFAULT_SALES_PER_KEY)
    }
}

impl InMemorySalesStore {
    /// Create a store keeping at most `sales_per_key` sales per item/world.
    #[must_use]
    pub fn new(sales_per_key: usize) -> Self {
        Self {
            markets: RwLock::new(HashMap::new()),
            sales_per_key,
        }
    }

    /// Apply an uploaded event. Every event bumps the upload time of its
    /// item/world; sales events also append their sales.
    pub fn record(&self, event: &MarketEvent) {
        self.record_at(event, Utc::now());
    }

    fn record_at(&self, event: &MarketEvent, at: DateTime<Utc>) {
        let mut markets = self.markets.write();
        let record = markets.entry(event.key()).or_insert_with(|| MarketRecord {
            sales: VecDeque::new(),
            last_upload_time: at,
        });
        record.last_upload_time = at;

        if let MarketEvent::SalesAdd { sales, .. } = event {
            record.sales.extend(sales.iter().cloned());
            while record.sales.len() > self.sales_per_key {
                record.sales.pop_front();
            }
        }
    }

    /// Number of item/world pairs with recorded uploads.
    pub fn markets(&self) -> usize {
        self.markets.read().len()
    }
}

#[async_trait]
impl ViewSource for InMemorySalesStore {
    async fn fetch_history(&self, key: ViewKey) -> Result<Option<HistoryView>, SourceError> {
        let markets = self.markets.read();
        Ok(markets.get(&key).map(|record| {
            HistoryView::from_sales(
                key,
                record.sales.iter().cloned().collect(),
                record.last_upload_time,
                self.sales_per_key,
            )
        }))
    }
}

// =============================================================================
// Tests
// =============================================================================
