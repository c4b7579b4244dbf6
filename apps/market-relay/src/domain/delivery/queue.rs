//! Per-Connection Delivery Queue
//!
//! Bounded priority queue of outbound messages ordered by enqueue time.
//! Producers never block: on overflow the oldest pending messages are
//! dropped. A single consumer suspends on a counting wake signal until a
//! producer hands it work.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

// =============================================================================
// Pending Message
// =============================================================================

/// A queued message and its priority key.
#[derive(Debug)]
pub struct PendingMessage<M> {
    /// Message to deliver.
    pub payload: M,
    /// Enqueue time in Unix milliseconds, never lower than an earlier push.
    pub priority: i64,
    sequence: u64,
}

impl<M> PendingMessage<M> {
    const fn key(&self) -> (i64, u64) {
        (self.priority, self.sequence)
    }
}

impl<M> PartialEq for PendingMessage<M> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<M> Eq for PendingMessage<M> {}

impl<M> PartialOrd for PendingMessage<M> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<M> Ord for PendingMessage<M> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Wake signal is shut; the owning connection is going away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("delivery wake signal closed")]
pub struct WakeClosed;

#[derive(Debug)]
struct QueueState<M> {
    pending: BinaryHeap<Reverse<PendingMessage<M>>>,
    last_priority: i64,
    next_sequence: u64,
}

/// Bounded, lossy, enqueue-time ordered message queue for one connection.
///
/// `len() <= limit` holds after every [`push`](Self::push) returns.
#[derive(Debug)]
pub struct DeliveryQueue<M> {
    state: Mutex<QueueState<M>>,
    limit: usize,
    wake: Semaphore,
    discarded: AtomicU64,
}

impl<M> DeliveryQueue<M> {
    /// Create a queue holding at most `limit` pending messages.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: BinaryHeap::with_capacity(limit.saturating_add(1)),
                last_priority: i64::MIN,
                next_sequence: 0,
            }),
            limit,
            wake: Semaphore::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Enqueue `payload` stamped with the current time.
    ///
    /// Drops the oldest pending messages until the bound holds again and
    /// wakes the consumer. Returns how many messages this push dropped.
    pub fn push(&self, payload: M) -> usize {
        self.push_at(payload, Utc::now().timestamp_millis())
    }

    /// Enqueue `payload` with an explicit enqueue timestamp.
    ///
    /// The priority is clamped so it never falls below an earlier push.
    pub fn push_at(&self, payload: M, timestamp_ms: i64) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            let priority = timestamp_ms.max(state.last_priority);
            let sequence = state.next_sequence;
            state.last_priority = priority;
            state.next_sequence += 1;
            state.pending.push(Reverse(PendingMessage {
                payload,
                priority,
                sequence,
            }));

            let mut dropped = 0;
            while state.pending.len() > self.limit {
                if state.pending.pop().is_some() {
                    dropped += 1;
                }
            }
            dropped
        };

        if dropped > 0 {
            // A consumer draining at the same time can make this approximate.
            self.discarded.fetch_add(dropped as u64, Ordering::Relaxed);
            tracing::debug!(dropped, limit = self.limit, "Delivery queue overflow");
        }

        self.signal();
        dropped
    }

    /// Remove the oldest pending message.
    pub fn pop(&self) -> Option<PendingMessage<M>> {
        self.state.lock().pending.pop().map(|Reverse(message)| message)
    }

    /// Suspend until a producer signals new work.
    ///
    /// # Errors
    ///
    /// [`WakeClosed`] once [`close`](Self::close) has been called.
    pub async fn wait(&self) -> Result<(), WakeClosed> {
        let permit = self.wake.acquire().await.map_err(|_| WakeClosed)?;
        permit.forget();
        Ok(())
    }

    /// Shut the wake signal. Later signals are ignored.
    pub fn close(&self) {
        self.wake.close();
    }

    /// Whether the wake signal has been shut.
    pub fn is_closed(&self) -> bool {
        self.wake.is_closed()
    }

    /// Pending message count.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Maximum pending messages.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Cumulative messages dropped on overflow.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn signal(&self) {
        if self.wake.is_closed() {
            tracing::debug!("Wake signal already closed, connection is shutting down");
            return;
        }
        if self.wake.available_permits() > 0 {
            tracing::trace!("Wake signal already set");
            return;
        }
        self.wake.add_permits(1);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use test_case::test_case;

    use super::*;

    fn drain(queue: &DeliveryQueue<u32>) -> Vec<u32> {
        std::iter::from_fn(|| queue.pop().map(|m| m.payload)).collect()
    }

    #[test]
    fn pops_in_push_order() {
        let q = DeliveryQueue::new(10);
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(drain(&q), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn earlier_timestamp_is_clamped() {
        let q = DeliveryQueue::new(10);
        q.push_at(1, 1_000);
        q.push_at(2, 500);
        let first = q.pop().unwrap();
        let second = q.pop().unwrap();
        assert_eq!(first.payload, 1);
        assert_eq!(second.payload, 2);
        assert_eq!(second.priority, 1_000);
    }

    #[test_case(1, 5 ; "tiny bound")]
    #[test_case(30, 35 ; "default bound")]
    #[test_case(8, 100 ; "heavy overflow")]
    fn overflow_keeps_newest(limit: usize, pushes: u32) {
        let q = DeliveryQueue::new(limit);
        for i in 0..pushes {
            q.push(i);
            assert!(q.len() <= limit);
        }
        assert_eq!(q.len(), limit);
        assert_eq!(q.discarded(), u64::from(pushes) - limit as u64);

        let expected: Vec<u32> = (pushes - limit as u32..pushes).collect();
        assert_eq!(drain(&q), expected);
    }

    #[test]
    fn push_reports_drops() {
        let q = DeliveryQueue::new(1);
        assert_eq!(q.push(1), 0);
        assert_eq!(q.push(2), 1);
    }

    #[test]
    fn zero_limit_drops_everything() {
        let q = DeliveryQueue::new(0);
        q.push(1);
        assert!(q.is_empty());
        assert_eq!(q.discarded(), 1);
    }

    #[tokio::test]
    async fn push_before_wait_is_not_lost() {
        let q = DeliveryQueue::new(4);
        q.push(7);
        q.push(8);
        tokio::time::timeout(Duration::from_millis(100), q.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(drain(&q), vec![7, 8]);
    }

    #[tokio::test]
    async fn wait_suspends_until_push() {
        let q = Arc::new(DeliveryQueue::new(4));
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        q.push(1);
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn close_releases_waiter() {
        let q: DeliveryQueue<u32> = DeliveryQueue::new(4);
        q.close();
        assert_eq!(q.wait().await, Err(WakeClosed));
        // Signalling a closed queue is tolerated.
        q.push(1);
        assert!(q.is_closed());
    }

    #[test]
    fn concurrent_producers_respect_bound() {
        let q = Arc::new(DeliveryQueue::new(30));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        q.push(t * 1_000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.len(), 30);
        assert_eq!(q.discarded(), 370);
    }
}
