//! Bounded Market View Cache
//!
//! Fixed-capacity, process-local cache used by request handlers for
//! compute-or-fetch lookups.
//!
//! - `clock`: second-chance eviction over a slot array
//! - `bounded`: the thread-safe cache itself
//! - `deep_clone`: the copy capability required of stored keys and values
//!
//! The cache makes no attempt at cross-process coherency; each process
//! holds its own entries and may serve views that are stale relative to
//! other nodes.

mod bounded;
pub mod clock;
mod deep_clone;

pub use bounded::{BoundedCache, CacheError, CacheStats};
pub use clock::{ClockHand, ReferenceBit};
pub use deep_clone::{CloneError, DeepClone, JsonSnapshot};
