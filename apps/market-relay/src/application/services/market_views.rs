//! Market View Service
//!
//! Compute-or-fetch access to market views: answer from the bounded cache
//! when possible, otherwise build the view from the [`ViewSource`] and
//! remember it. The source is awaited with no cache lock held.
//!
//! A fetched view is only stored if no invalidation happened while the
//! source was being awaited; otherwise it is returned uncached.

use parking_lot::Mutex;

use crate::application::ports::{SourceError, ViewSource};
use crate::domain::cache::{BoundedCache, CacheError, CacheStats};
use crate::domain::market::{HistoryView, ViewKey};
use crate::infrastructure::metrics;

/// Default number of cached views.
pub const DEFAULT_CACHE_CAPACITY: usize = 2_000;

/// Errors from [`MarketViewService`].
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    /// The backing store failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The view could not be cached.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Cached access to history views.
pub struct MarketViewService<S> {
    source: S,
    histories: BoundedCache<ViewKey, HistoryView>,
    // Bumped by every invalidation; guards cache fills against stale fetches.
    generation: Mutex<u64>,
}

impl<S: ViewSource> MarketViewService<S> {
    /// Create a service caching up to `capacity` views.
    #[must_use]
    pub fn new(source: S, capacity: usize) -> Self {
        Self {
            source,
            histories: BoundedCache::new(capacity),
            generation: Mutex::new(0),
        }
    }

    /// History view for `key`.
    ///
    /// Returns `Ok(None)` when the source knows nothing about the key;
    /// nothing is cached in that case.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError`] if the source fails or the built view cannot be
    /// stored.
    pub async fn history(&self, key: ViewKey) -> Result<Option<HistoryView>, ViewError> {
        if let Some(view) = self.histories.get(&key) {
            metrics::record_cache_lookup(true);
            return Ok(Some(view));
        }
        metrics::record_cache_lookup(false);

        let started_at = *self.generation.lock();
        let Some(view) = self.source.fetch_history(key).await? else {
            tracing::debug!(key = %key, "No history for view");
            return Ok(None);
        };

        {
            let generation = self.generation.lock();
            if *generation == started_at {
                self.histories.set(&key, &view)?;
            } else {
                tracing::debug!(key = %key, "View invalidated during fetch, not caching");
            }
        }
        Ok(Some(view))
    }

    /// Drop the cached view for `key`. Returns whether one was cached.
    ///
    /// A fetch already in flight for any key will not populate the cache.
    pub fn invalidate(&self, key: ViewKey) -> bool {
        let removed = {
            let mut generation = self.generation.lock();
            *generation = generation.wrapping_add(1);
            self.histories.delete(&key)
        };
        if removed {
            tracing::debug!(key = %key, "Invalidated cached view");
        }
        removed
    }

    /// Number of cached views.
    pub fn cached_views(&self) -> usize {
        self.histories.count()
    }

    /// Cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.histories.stats()
    }
}

// =============================================================================
// Tests
// =============================================================================
