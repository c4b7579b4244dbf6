//! WebSocket Server
//!
//! Accepts TCP connections, performs the WebSocket upgrade and gives each
//! connection its own delivery loop. Inbound data frames are ignored; the
//! reader task only watches for the peer going away.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::SplitStream;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::transport::WebSocketTransport;
use crate::application::services::{ConnectionClient, DeliveryConfig};
use crate::infrastructure::registry::ConnectionRegistry;

/// How long to wait for the peer's close reply after the loop stops.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Registry of server-side WebSocket connections.
pub type WebSocketRegistry = ConnectionRegistry<WebSocketTransport>;

/// WebSocket server errors.
#[derive(Debug, thiserror::Error)]
pub enum WebSocketServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),
}

/// Realtime WebSocket server.
pub struct WebSocketServer {
    registry: Arc<WebSocketRegistry>,
    config: DeliveryConfig,
    cancel: CancellationToken,
}

impl WebSocketServer {
    /// Create a server publishing through `registry`.
    #[must_use]
    pub const fn new(
        registry: Arc<WebSocketRegistry>,
        config: DeliveryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            config,
            cancel,
        }
    }

    /// Bind to `port` on all interfaces and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `WebSocketServerError` if binding fails.
    pub async fn run(self, port: u16) -> Result<(), WebSocketServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WebSocketServerError::BindFailed(port, e.to_string()))?;

        tracing::info!(port, "WebSocket server listening");
        self.serve(listener).await;
        Ok(())
    }

    /// Serve connections from an already bound listener until cancelled.
    pub async fn serve(self, listener: TcpListener) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&self.registry),
                            self.config.clone(),
                            self.cancel.child_token(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }
        tracing::info!("WebSocket server stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<WebSocketRegistry>,
    config: DeliveryConfig,
    cancel: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let (write, read) = ws.split();
    let open = Arc::new(AtomicBool::new(true));
    let client = Arc::new(ConnectionClient::new(
        WebSocketTransport::new(write, Arc::clone(&open)),
        config,
    ));
    let id = client.id();
    tracing::debug!(connection_id = %id, %peer, "WebSocket connection accepted");

    registry.register(&client);
    let mut reader = tokio::spawn(watch_peer(read, open, cancel.clone(), id));

    if let Err(e) = client.run(cancel.clone()).await {
        tracing::error!(connection_id = %id, error = %e, "Delivery loop did not start");
    }
    cancel.cancel();

    if tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_err() {
        tracing::debug!(connection_id = %id, "Peer did not finish close handshake");
        reader.abort();
    }
}

/// Drive the read half until the peer closes or errors, then mark the
/// transport closed and stop the connection's loop.
async fn watch_peer(
    mut read: SplitStream<WebSocketStream<TcpStream>>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
    id: Uuid,
) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Close(frame)) => {
                tracing::debug!(connection_id = %id, ?frame, "Peer sent close");
                break;
            }
            Ok(Message::Text(_) | Message::Binary(_)) => {
                tracing::trace!(connection_id = %id, "Ignoring inbound message");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "WebSocket read failed");
                break;
            }
        }
    }
    open.store(false, Ordering::Release);
    cancel.cancel();
}
