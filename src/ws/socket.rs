//! Duplex socket capability used by hub connections.
//!
//! A [`crate::ws::Connection`] only ever talks to its client through
//! [`DuplexSocket`], so any transport offering receive / send / close can
//! back a session. [`AxumSocket`] adapts an upgraded axum [`WebSocket`].

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::HubError;

/// Narrow receive / send / close capability over a client connection.
///
/// `receive` and `send` may run concurrently from different tasks; callers
/// are responsible for serializing sends.
#[async_trait]
pub trait DuplexSocket: Send + Sync + 'static {
    /// Waits for the next application frame from the client.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Read`] when the peer closed the connection, the
    /// transport failed, or [`DuplexSocket::close`] was called.
    async fn receive(&self) -> Result<Vec<u8>, HubError>;

    /// Sends one text frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Write`] if the frame could not be written.
    async fn send(&self, text: String) -> Result<(), HubError>;

    /// Closes the socket, unblocking any pending `receive`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Write`] if the close handshake could not be sent.
    async fn close(&self) -> Result<(), HubError>;
}

/// [`DuplexSocket`] over an upgraded axum WebSocket.
///
/// The socket is split so a blocked `receive` never holds up writes.
/// Protocol-level ping/pong frames are answered by the transport and skipped.
#[derive(Debug)]
pub struct AxumSocket {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    closed: CancellationToken,
}

impl AxumSocket {
    /// Wraps an upgraded WebSocket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl DuplexSocket for AxumSocket {
    async fn receive(&self) -> Result<Vec<u8>, HubError> {
        let mut stream = self.stream.lock().await;
        loop {
            let next = tokio::select! {
                () = self.closed.cancelled() => {
                    return Err(HubError::Read("socket closed".to_string()));
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().as_bytes().to_vec()),
                Some(Ok(Message::Binary(bytes))) => return Ok(bytes.to_vec()),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    return Err(HubError::Read("closed by peer".to_string()));
                }
                Some(Err(e)) => return Err(HubError::Read(e.to_string())),
            }
        }
    }

    async fn send(&self, text: String) -> Result<(), HubError> {
        if self.closed.is_cancelled() {
            return Err(HubError::Write("socket closed".to_string()));
        }
        let mut sink = self.sink.lock().await;
        tokio::select! {
            () = self.closed.cancelled() => Err(HubError::Write("socket closed".to_string())),
            res = sink.send(Message::text(text)) => res.map_err(|e| HubError::Write(e.to_string())),
        }
    }

    async fn close(&self) -> Result<(), HubError> {
        self.closed.cancel();
        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| HubError::Write(e.to_string()))
    }
}
