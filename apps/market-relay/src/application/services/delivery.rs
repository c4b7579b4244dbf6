//! Connection Delivery Service
//!
//! Couples one connection's [`DeliveryQueue`] with the single task allowed
//! to drain it onto a [`Transport`].
//!
//! # Loop
//!
//! ```text
//! Idle ─run()─► Running: wait(wake | cancel) ─► drain oldest-first ─► send frames
//!                  │
//!                  └─ cancel / transport closed / send error
//!                        ─► Closing: close transport ─► Stopped: callbacks, wake closed
//! ```
//!
//! Producers call [`ConnectionClient::push`] from any thread; it never
//! blocks and never fails. Each message is serialized to JSON and written as
//! frames of at most `max_frame_bytes`; frames of different messages never
//! interleave.

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{Transport, TransportError};
use crate::domain::delivery::{DeliveryError, DeliveryQueue, LoopState, LoopStateCell};
use crate::infrastructure::metrics;

/// Default pending-message bound per connection.
pub const DEFAULT_QUEUE_LIMIT: usize = 30;

/// Default maximum frame payload.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 128 * 1024;

/// Default reason sent with the close handshake.
pub const DEFAULT_CLOSE_REASON: &str = "closing socket";

// =============================================================================
// Configuration
// =============================================================================

/// Per-connection delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Pending messages kept before the oldest are dropped.
    pub queue_limit: usize,
    /// Largest frame payload written to the transport.
    pub max_frame_bytes: usize,
    /// Reason sent when closing the transport.
    pub close_reason: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_limit: DEFAULT_QUEUE_LIMIT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            close_reason: DEFAULT_CLOSE_REASON.to_string(),
        }
    }
}

impl From<crate::DeliverySettings> for DeliveryConfig {
    fn from(settings: crate::DeliverySettings) -> Self {
        Self {
            queue_limit: settings.queue_limit,
            max_frame_bytes: settings.max_frame_bytes,
            close_reason: settings.close_reason,
        }
    }
}

// =============================================================================
// Close Notification
// =============================================================================

type CloseCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CloseCallbacks {
    fired: bool,
    pending: Vec<CloseCallback>,
}

/// Why the loop stopped draining.
#[derive(Debug)]
enum LoopExit {
    Cancelled,
    TransportClosed,
    SignalClosed,
    SendFailed(TransportError),
}

// =============================================================================
// Connection Client
// =============================================================================

/// One live connection: its bounded queue, its transport and its loop.
///
/// Not restartable: once [`run`](Self::run) returns, a new client is needed.
pub struct ConnectionClient<M, T> {
    id: Uuid,
    queue: DeliveryQueue<M>,
    transport: Mutex<Option<T>>,
    state: LoopStateCell,
    on_close: Mutex<CloseCallbacks>,
    finished: CancellationToken,
    config: DeliveryConfig,
}

impl<M, T> ConnectionClient<M, T> {
    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    /// Whether a loop is active (running or closing).
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state.get(), LoopState::Running | LoopState::Closing)
    }

    /// Register a callback fired once when the loop stops.
    ///
    /// Registering after the loop stopped fires the callback immediately.
    pub fn register_on_close(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self.on_close.lock();
        if callbacks.fired {
            drop(callbacks);
            callback();
            return;
        }
        callbacks.pending.push(Box::new(callback));
    }

    /// Resolve once the loop has stopped and callbacks have fired.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }

    /// Pending message count.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Cumulative messages dropped on overflow.
    pub fn discarded(&self) -> u64 {
        self.queue.discarded()
    }

    /// Pending-message bound.
    #[must_use]
    pub const fn queue_limit(&self) -> usize {
        self.queue.limit()
    }

    fn finish(&self) {
        let pending = {
            let mut callbacks = self.on_close.lock();
            if callbacks.fired {
                Vec::new()
            } else {
                callbacks.fired = true;
                std::mem::take(&mut callbacks.pending)
            }
        };
        for callback in pending {
            callback();
        }

        self.queue.close();
        self.state.advance(LoopState::Stopped);
        self.finished.cancel();
    }
}

impl<M, T> ConnectionClient<M, T>
where
    M: Serialize + Send,
    T: Transport,
{
    /// Create a client for an accepted connection.
    #[must_use]
    pub fn new(transport: T, config: DeliveryConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: DeliveryQueue::new(config.queue_limit),
            transport: Mutex::new(Some(transport)),
            state: LoopStateCell::new(),
            on_close: Mutex::new(CloseCallbacks::default()),
            finished: CancellationToken::new(),
            config,
        }
    }

    /// Queue `message` for delivery. Returns how many older messages were
    /// dropped to make room.
    pub fn push(&self, message: M) -> usize {
        let dropped = self.queue.push(message);
        if dropped > 0 {
            metrics::record_messages_discarded(dropped);
        }
        dropped
    }

    /// Drain the queue onto the transport until cancelled, the transport
    /// closes, or a send fails.
    ///
    /// On every exit the transport is closed if still open, close callbacks
    /// fire exactly once and the wake signal is shut.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::AlreadyRunning`] if a loop is active,
    /// [`DeliveryError::Stopped`] if this client already ran.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), DeliveryError> {
        self.state.start()?;
        let _stop = StopGuard(self);

        let taken = self.transport.lock().take();
        let Some(mut transport) = taken else {
            tracing::warn!(connection_id = %self.id, "Delivery loop started without a transport");
            return Ok(());
        };

        tracing::debug!(connection_id = %self.id, "Delivery loop started");
        let exit = self.deliver(&mut transport, &cancel).await;
        self.state.advance(LoopState::Closing);

        match &exit {
            LoopExit::Cancelled => {
                tracing::debug!(connection_id = %self.id, "Delivery loop cancelled");
            }
            LoopExit::TransportClosed => {
                tracing::debug!(connection_id = %self.id, "Transport closed by peer");
            }
            LoopExit::SignalClosed => {
                tracing::debug!(connection_id = %self.id, "Wake signal closed");
            }
            LoopExit::SendFailed(e) => {
                metrics::record_send_failure();
                tracing::error!(connection_id = %self.id, error = %e, "Delivery loop aborted");
            }
        }

        if transport.is_open()
            && let Err(e) = transport.close(&self.config.close_reason).await
        {
            tracing::warn!(connection_id = %self.id, error = %e, "Failed to close transport");
        }

        tracing::debug!(
            connection_id = %self.id,
            discarded = self.queue.discarded(),
            "Delivery loop stopped"
        );
        Ok(())
    }

    async fn deliver(&self, transport: &mut T, cancel: &CancellationToken) -> LoopExit {
        loop {
            if cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }
            if !transport.is_open() {
                return LoopExit::TransportClosed;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return LoopExit::Cancelled,
                woken = self.queue.wait() => {
                    if woken.is_err() {
                        return LoopExit::SignalClosed;
                    }
                }
            }

            while let Some(message) = self.queue.pop() {
                let encoded = match serde_json::to_vec(&message.payload) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::error!(connection_id = %self.id, error = %e, "Failed to encode message");
                        continue;
                    }
                };
                drop(message);

                if let Err(e) = self.send_frames(transport, &encoded).await {
                    return LoopExit::SendFailed(e);
                }
                metrics::record_message_sent(encoded.len());

                if cancel.is_cancelled() {
                    return LoopExit::Cancelled;
                }
            }
        }
    }

    async fn send_frames(&self, transport: &mut T, bytes: &[u8]) -> Result<(), TransportError> {
        let mut frames = bytes.chunks(self.config.max_frame_bytes.max(1)).peekable();
        while let Some(frame) = frames.next() {
            transport.send(frame, frames.peek().is_none()).await?;
        }
        Ok(())
    }
}

/// Runs the stop sequence when the loop exits, including on early return or
/// if the loop future is dropped mid-flight.
struct StopGuard<'a, M, T>(&'a ConnectionClient<M, T>);

impl<M, T> Drop for StopGuard<'_, M, T> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_test::{assert_pending, task};

    use super::*;

    #[derive(Default)]
    struct Wire {
        frames: Mutex<Vec<(Vec<u8>, bool)>>,
        closed_with: Mutex<Option<String>>,
    }

    impl Wire {
        fn messages(&self) -> Vec<String> {
            let mut out = Vec::new();
            let mut current = Vec::new();
            for (bytes, is_final) in self.frames.lock().iter() {
                current.extend_from_slice(bytes);
                if *is_final {
                    out.push(String::from_utf8(std::mem::take(&mut current)).unwrap());
                }
            }
            out
        }
    }

    struct FakeTransport {
        wire: Arc<Wire>,
        open: Arc<AtomicBool>,
        fail_after: Option<usize>,
        sent: usize,
    }

    impl FakeTransport {
        fn new(wire: Arc<Wire>) -> Self {
            Self {
                wire,
                open: Arc::new(AtomicBool::new(true)),
                fail_after: None,
                sent: 0,
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&mut self, frame: &[u8], is_final: bool) -> Result<(), TransportError> {
            if self.fail_after.is_some_and(|n| self.sent >= n) {
                return Err(TransportError::Send("boom".to_string()));
            }
            self.sent += 1;
            self.wire.frames.lock().push((frame.to_vec(), is_final));
            Ok(())
        }

        async fn close(&mut self, reason: &str) -> Result<(), TransportError> {
            self.open.store(false, Ordering::SeqCst);
            *self.wire.closed_with.lock() = Some(reason.to_string());
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    fn client(
        transport: FakeTransport,
        config: DeliveryConfig,
    ) -> Arc<ConnectionClient<u32, FakeTransport>> {
        Arc::new(ConnectionClient::new(transport, config))
    }

    #[tokio::test]
    async fn delivers_in_push_order_then_closes_on_cancel() {
        let wire = Arc::new(Wire::default());
        let c = client(FakeTransport::new(Arc::clone(&wire)), DeliveryConfig::default());
        for i in 1..=3 {
            c.push(i);
        }

        let cancel = CancellationToken::new();
        let handle = {
            let c = Arc::clone(&c);
            let cancel = cancel.clone();
            tokio::spawn(async move { c.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(c.is_running());
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(wire.messages(), vec!["1", "2", "3"]);
        assert_eq!(wire.closed_with.lock().as_deref(), Some(DEFAULT_CLOSE_REASON));
        assert_eq!(c.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn large_message_is_fragmented() {
        let wire = Arc::new(Wire::default());
        let config = DeliveryConfig {
            max_frame_bytes: 4,
            ..DeliveryConfig::default()
        };
        let c: Arc<ConnectionClient<String, FakeTransport>> =
            Arc::new(ConnectionClient::new(FakeTransport::new(Arc::clone(&wire)), config));
        c.push("abcdefghij".to_string());

        let cancel = CancellationToken::new();
        let handle = {
            let c = Arc::clone(&c);
            let cancel = cancel.clone();
            tokio::spawn(async move { c.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let frames = wire.frames.lock().clone();
        // "\"abcdefghij\"" is 12 bytes.
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|(f, _)| f.len() <= 4));
        let finals: Vec<bool> = frames.iter().map(|(_, fin)| *fin).collect();
        assert_eq!(finals, vec![false, false, true]);
        assert_eq!(wire.messages(), vec!["\"abcdefghij\""]);
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let wire = Arc::new(Wire::default());
        let c = client(FakeTransport::new(wire), DeliveryConfig::default());
        let cancel = CancellationToken::new();

        let first = {
            let c = Arc::clone(&c);
            let cancel = cancel.clone();
            tokio::spawn(async move { c.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(c.run(cancel.clone()).await, Err(DeliveryError::AlreadyRunning));

        cancel.cancel();
        first.await.unwrap().unwrap();
        assert_eq!(c.run(cancel).await, Err(DeliveryError::Stopped));
    }

    #[tokio::test]
    async fn callback_fires_once_on_cancel_with_empty_queue() {
        let wire = Arc::new(Wire::default());
        let c = client(FakeTransport::new(wire), DeliveryConfig::default());
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            c.register_on_close(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        c.run(cancel).await.unwrap();
        c.closed().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!c.is_running());
    }

    #[tokio::test]
    async fn send_failure_stops_loop_and_fires_callback() {
        let wire = Arc::new(Wire::default());
        let mut transport = FakeTransport::new(Arc::clone(&wire));
        transport.fail_after = Some(1);
        let c = client(transport, DeliveryConfig::default());
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            c.register_on_close(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        c.push(1);
        c.push(2);
        c.push(3);

        tokio::time::timeout(Duration::from_secs(1), c.run(CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(wire.messages(), vec!["1"]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(wire.closed_with.lock().is_some());
    }

    #[tokio::test]
    async fn closed_transport_ends_loop() {
        let wire = Arc::new(Wire::default());
        let transport = FakeTransport::new(Arc::clone(&wire));
        transport.open.store(false, Ordering::SeqCst);
        let c = client(transport, DeliveryConfig::default());

        c.run(CancellationToken::new()).await.unwrap();
        assert_eq!(c.state(), LoopState::Stopped);
        assert!(wire.closed_with.lock().is_none());
    }

    #[tokio::test]
    async fn late_registration_fires_immediately() {
        let wire = Arc::new(Wire::default());
        let c = client(FakeTransport::new(wire), DeliveryConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        c.run(cancel).await.unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        {
            let fired = Arc::clone(&fired);
            c.register_on_close(move || fired.store(true, Ordering::SeqCst));
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn idle_loop_waits_without_spinning() {
        let wire = Arc::new(Wire::default());
        let c = client(FakeTransport::new(Arc::clone(&wire)), DeliveryConfig::default());
        let cancel = CancellationToken::new();

        let mut run = task::spawn(c.run(cancel.clone()));
        assert_pending!(run.poll());
        assert_pending!(run.poll());
        assert!(!run.is_woken());

        c.push(5);
        assert!(run.is_woken());
        assert_pending!(run.poll());
        assert_eq!(wire.messages(), vec!["5"]);

        cancel.cancel();
        assert!(run.is_woken());
        assert!(run.poll().is_ready());
        drop(run);
        assert_eq!(c.state(), LoopState::Stopped);
    }

    #[test]
    fn overflow_drops_oldest_before_delivery() {
        let wire = Arc::new(Wire::default());
        let c = client(FakeTransport::new(wire), DeliveryConfig::default());
        for i in 0..35 {
            c.push(i);
            assert!(c.pending() <= DEFAULT_QUEUE_LIMIT);
        }
        assert_eq!(c.pending(), 30);
        assert_eq!(c.discarded(), 5);
    }
}
