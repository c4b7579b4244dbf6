//! Delivery Loop State Machine
//!
//! ```text
//! Idle ──run()──► Running ──exit──► Closing ──cleanup──► Stopped
//! ```
//!
//! `Running` is only entered from `Idle`. `Stopped` is terminal.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a connection's delivery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    /// Created, loop not started.
    Idle = 0,
    /// Loop is draining the queue.
    Running = 1,
    /// Loop exited and is closing the transport.
    Closing = 2,
    /// Terminal.
    Stopped = 3,
}

impl LoopState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Closing,
            _ => Self::Stopped,
        }
    }

    /// State name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Stopped => "stopped",
        }
    }
}

/// Errors starting a delivery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Another loop is already consuming this connection's queue.
    #[error("the delivery loop is already running")]
    AlreadyRunning,

    /// The loop already ran to completion and cannot be restarted.
    #[error("the delivery loop has stopped and cannot be restarted")]
    Stopped,
}

/// Atomic holder for [`LoopState`].
#[derive(Debug)]
pub struct LoopStateCell(AtomicU8);

impl Default for LoopStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopStateCell {
    /// Start in [`LoopState::Idle`].
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(LoopState::Idle as u8))
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> LoopState {
        LoopState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Atomically move `Idle -> Running`.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::AlreadyRunning`] while running or closing,
    /// [`DeliveryError::Stopped`] once stopped.
    pub fn start(&self) -> Result<(), DeliveryError> {
        self.0
            .compare_exchange(
                LoopState::Idle as u8,
                LoopState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|current| match LoopState::from_u8(current) {
                LoopState::Stopped => DeliveryError::Stopped,
                _ => DeliveryError::AlreadyRunning,
            })
    }

    /// Move forward to `state`. Never moves backwards.
    pub fn advance(&self, state: LoopState) {
        self.0.fetch_max(state as u8, Ordering::AcqRel);
    }
}

// =============================================================================
// Tests
// =============================================================================
