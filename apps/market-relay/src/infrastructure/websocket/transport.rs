//! WebSocket Transport
//!
//! [`Transport`] over the write half of a `tokio-tungstenite` stream. Each
//! frame handed in becomes one raw WebSocket frame: the first frame of a
//! message is a text frame, the rest are continuation frames, and only the
//! last one carries FIN.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt};
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};

use crate::application::ports::{Transport, TransportError};

/// Write half of an accepted server connection.
pub type ServerSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Outbound side of one WebSocket connection.
pub struct WebSocketTransport<S = ServerSink> {
    sink: S,
    open: Arc<AtomicBool>,
    mid_message: bool,
}

impl<S> WebSocketTransport<S> {
    /// Wrap `sink`. `open` is shared with the reader task, which clears it
    /// when the peer goes away.
    #[must_use]
    pub const fn new(sink: S, open: Arc<AtomicBool>) -> Self {
        Self {
            sink,
            open,
            mid_message: false,
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    async fn send(&mut self, frame: &[u8], is_final: bool) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let data = if self.mid_message {
            Data::Continue
        } else {
            Data::Text
        };
        let frame = Frame::message(frame.to_vec(), OpCode::Data(data), is_final);

        if let Err(e) = self.sink.send(Message::Frame(frame)).await {
            self.mark_closed();
            return Err(TransportError::Send(e.to_string()));
        }
        self.mid_message = !is_final;
        Ok(())
    }

    async fn close(&mut self, reason: &str) -> Result<(), TransportError> {
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        }));
        let result = self.sink.send(close).await;
        self.mark_closed();
        result.map_err(|e| TransportError::Close(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

// =============================================================================
// Tests
// =============================================================================
