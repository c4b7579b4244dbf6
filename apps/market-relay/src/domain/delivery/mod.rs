//! Live Update Delivery
//!
//! Per-connection building blocks for pushing events to a client:
//!
//! - `queue`: bounded, lossy, enqueue-time ordered queue with a wake signal
//! - `state`: lifecycle of the single consumer loop
//!
//! Which connections receive which events is decided elsewhere; a queue
//! only ever belongs to one already-identified connection.

mod queue;
mod state;

pub use queue::{DeliveryQueue, PendingMessage, WakeClosed};
pub use state::{DeliveryError, LoopState, LoopStateCell};
