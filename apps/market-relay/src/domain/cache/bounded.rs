//! Bounded Cache
//!
//! Fixed-capacity key/value cache with clock eviction.
//!
//! # Layout
//!
//! ```text
//! index: HashMap<K, usize>         key -> slot
//! slots: Vec<Option<Entry<K, V>>>  fixed length == capacity
//! free:  Vec<usize>                unoccupied slots
//! hand:  ClockHand                 eviction cursor
//! ```
//!
//! Invariants (held under the lock between operations):
//! - `slots[index[k]].key == k` for every indexed key
//! - `free.len() + index.len() == capacity`
//!
//! Values go in and come out as [`DeepClone`] copies, so nothing a caller
//! holds aliases what the cache stores. Incoming copies are made before the
//! lock is taken.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

use super::clock::{ClockHand, ReferenceBit};
use super::deep_clone::{CloneError, DeepClone};

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by [`BoundedCache::set`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The key or value could not be copied into the cache.
    #[error("cache entry rejected: {0}")]
    Uncopyable(#[from] CloneError),

    /// A zero-capacity cache can never hold an entry.
    #[error("cache has zero capacity")]
    ZeroCapacity,
}

// =============================================================================
// Statistics
// =============================================================================

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Live entries.
    pub entries: usize,
    /// Fixed capacity.
    pub capacity: usize,
    /// Lookups that found a value.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries removed by the clock hand.
    pub evictions: u64,
}

// =============================================================================
// Slot State
// =============================================================================

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    referenced: bool,
}

impl<K, V> ReferenceBit for Entry<K, V> {
    fn is_referenced(&self) -> bool {
        self.referenced
    }

    fn clear_reference(&mut self) {
        self.referenced = false;
    }
}

#[derive(Debug)]
struct CacheState<K, V> {
    slots: Vec<Option<Entry<K, V>>>,
    index: HashMap<K, usize>,
    free: Vec<usize>,
    hand: ClockHand,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K, V> CacheState<K, V>
where
    K: Clone + Eq + Hash,
{
    fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            index: HashMap::with_capacity(capacity),
            // Reversed so slot 0 is handed out first.
            free: (0..capacity).rev().collect(),
            hand: ClockHand::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn insert(&mut self, key: K, value: V) -> Result<(), CacheError> {
        if let Some(&idx) = self.index.get(&key)
            && let Some(entry) = self.slots[idx].as_mut()
        {
            entry.value = value;
            entry.referenced = false;
            return Ok(());
        }

        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                let victim = self
                    .hand
                    .sweep(&mut self.slots)
                    .ok_or(CacheError::ZeroCapacity)?;
                self.release(victim);
                self.evictions += 1;
                tracing::trace!(slot = victim, "Evicted cache entry");
                self.free.pop().ok_or(CacheError::ZeroCapacity)?
            }
        };

        self.index.insert(key.clone(), idx);
        self.slots[idx] = Some(Entry {
            key,
            value,
            referenced: false,
        });
        Ok(())
    }

    fn release(&mut self, idx: usize) -> bool {
        let Some(entry) = self.slots[idx].take() else {
            return false;
        };
        self.index.remove(&entry.key);
        self.free.push(idx);
        true
    }
}

// =============================================================================
// Bounded Cache
// =============================================================================

/// Thread-safe, fixed-capacity cache with second-chance eviction.
///
/// Every operation takes a single mutex for its whole (synchronous)
/// duration, so operations are linearizable.
///
/// # Example
///
/// ```rust
/// use market_relay::domain::cache::BoundedCache;
///
/// let cache: BoundedCache<u32, String> = BoundedCache::new(2);
/// cache.set(&1, &"one".to_string()).unwrap();
/// cache.set(&2, &"two".to_string()).unwrap();
///
/// // Reading marks entry 1 as recently used.
/// assert_eq!(cache.get(&1).as_deref(), Some("one"));
///
/// // Entry 2 is the one evicted.
/// cache.set(&3, &"three".to_string()).unwrap();
/// assert!(cache.get(&2).is_none());
/// assert_eq!(cache.count(), 2);
/// ```
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    capacity: usize,
}

impl<K, V> BoundedCache<K, V>
where
    K: DeepClone + Clone + Eq + Hash,
    V: DeepClone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A capacity of zero is accepted but every [`set`](Self::set) fails
    /// with [`CacheError::ZeroCapacity`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::new(capacity)),
            capacity,
        }
    }

    /// Store a copy of `value` under a copy of `key`.
    ///
    /// Overwriting an existing key resets its referenced bit. When the
    /// cache is full the clock hand evicts one entry first.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Uncopyable`] if the key or value cannot be copied.
    /// - [`CacheError::ZeroCapacity`] if the cache cannot hold anything.
    pub fn set(&self, key: &K, value: &V) -> Result<(), CacheError> {
        let key = key.deep_clone()?;
        let value = value.deep_clone()?;

        if self.capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }

        self.state.lock().insert(key, value)
    }

    /// Return a copy of the value stored under `key`.
    ///
    /// A hit marks the entry as referenced. A stored value that fails to
    /// copy is reported as a miss and left in place.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();

        let Some(&idx) = state.index.get(key) else {
            state.misses += 1;
            return None;
        };
        let Some(entry) = state.slots[idx].as_mut() else {
            state.misses += 1;
            return None;
        };

        entry.referenced = true;
        match entry.value.deep_clone() {
            Ok(copy) => {
                state.hits += 1;
                Some(copy)
            }
            Err(e) => {
                state.misses += 1;
                tracing::warn!(slot = idx, error = %e, "Cached value could not be copied");
                None
            }
        }
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        match state.index.get(key).copied() {
            Some(idx) => state.release(idx),
            None => false,
        }
    }

    /// Whether `key` is present. Does not touch the referenced bit.
    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().index.contains_key(key)
    }

    /// Number of live entries.
    pub fn count(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Fixed capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.index.len(),
            capacity: self.capacity,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }

    /// Verify the slot/index/free-pool invariants.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        let state = self.state.lock();

        if state.free.len() + state.index.len() != self.capacity {
            return Err(format!(
                "free ({}) + indexed ({}) != capacity ({})",
                state.free.len(),
                state.index.len(),
                self.capacity
            ));
        }

        for (key, &idx) in &state.index {
            match state.slots.get(idx) {
                Some(Some(entry)) if entry.key == *key => {}
                _ => return Err(format!("index points at slot {idx} not holding its key")),
            }
        }

        for &idx in &state.free {
            if state.slots.get(idx).is_none_or(Option::is_some) {
                return Err(format!("free slot {idx} is occupied or out of range"));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
