//! WebSocket Adapter
//!
//! Server side of the realtime feed: connection acceptance and the
//! [`Transport`](crate::application::ports::Transport) implementation over
//! `tokio-tungstenite`.

mod server;
mod transport;

pub use server::{WebSocketRegistry, WebSocketServer, WebSocketServerError};
pub use transport::{ServerSink, WebSocketTransport};
