//! Connection handles and the registry of live connections

use crate::broadcast::Transport;
use crate::error::{RelayError, RelayResult};
use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

/// Opaque identity of one client session, assigned at accept time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for ConnectionId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Sending half of a WebSocket connection
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub remote_addr: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<Message>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            id,
            remote_addr,
            tx,
        }
    }

    /// The writer task is still draining this connection's queue
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text frame for the writer task
    pub fn send_text(&self, text: &str) -> RelayResult<()> {
        self.tx
            .send(Message::text(text))
            .map_err(|_| RelayError::ConnectionClosed)
    }
}

/// Every connection the transport currently knows about
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connection: Connection) {
        self.connections.insert(connection.id, connection);
    }

    /// Forget a connection, dropping its sender so the writer task winds down
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Transport for ConnectionRegistry {
    fn is_open(&self, connection: ConnectionId) -> bool {
        self.connections
            .get(&connection)
            .is_some_and(Connection::is_open)
    }

    fn send(&self, connection: ConnectionId, payload: &str) -> RelayResult<()> {
        self.connections
            .get(&connection)
            .ok_or(RelayError::ConnectionClosed)?
            .send_text(payload)
    }
}

/// Drains a connection's queue into the WebSocket sink
pub(crate) struct ConnectionWriter {
    id: ConnectionId,
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl ConnectionWriter {
    pub fn new(
        id: ConnectionId,
        sink: SplitSink<WebSocketStream<TcpStream>, Message>,
        rx: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self { id, sink, rx }
    }

    /// Runs until the registry drops the sender or the socket fails
    pub async fn run(mut self) -> RelayResult<()> {
        while let Some(message) = self.rx.recv().await {
            if let Err(e) = self.sink.send(message).await {
                tracing::debug!(connection_id = %self.id, error = %e, "Failed to write frame");
                return Err(RelayError::WebSocket(e));
            }
        }

        let _ = self.sink.close().await;
        Ok(())
    }
}
