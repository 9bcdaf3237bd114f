//! WebSocket transport and the relay's event loop
//!
//! Every accepted socket gets a reader task and a writer task. Readers never
//! touch room state: they forward frames and close notifications into a
//! single channel, and one event loop task owns the [`Router`] and the
//! [`ConnectionRegistry`] and handles events strictly in order.

use crate::config::RelayConfig;
use crate::connection::{Connection, ConnectionId, ConnectionRegistry, ConnectionWriter};
use crate::error::{RelayError, RelayResult};
use crate::handler::Router;
use futures_util::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// What the transport reports to the event loop
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Handshake finished; the connection can be sent to
    Opened(Connection),
    /// A text or binary frame arrived
    Frame { id: ConnectionId, message: Message },
    /// The socket is gone
    Closed(ConnectionId),
}

/// A bound signaling relay, ready to run
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl RelayServer {
    /// Bind the listening socket
    pub async fn bind(config: &RelayConfig) -> RelayResult<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address actually bound, useful when the configured port was 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` resolves
    ///
    /// On shutdown the listener stops accepting and the event loop is torn
    /// down, which drops every connection's outbound queue.
    pub async fn run_until<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %self.local_addr, "WebSocket signaling server listening");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let event_loop = tokio::spawn(run_event_loop(events_rx));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let events = events_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, events).await {
                                tracing::debug!(addr = %addr, error = %e, "Connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        tracing::info!("Shutting down signaling server");
        event_loop.abort();
        let _ = event_loop.await;
        Ok(())
    }
}

/// Owns all relay state; the only place rooms are mutated
async fn run_event_loop(mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    let mut router = Router::new();
    let mut registry = ConnectionRegistry::new();

    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Opened(connection) => {
                tracing::info!(
                    connection_id = %connection.id,
                    remote_addr = ?connection.remote_addr,
                    "New client connected"
                );
                registry.register(connection);
            }
            ConnectionEvent::Frame { id, message } => match &message {
                Message::Text(text) => router.on_message(&registry, id, text.as_bytes()),
                Message::Binary(data) => router.on_message(&registry, id, data),
                _ => {}
            },
            ConnectionEvent::Closed(id) => {
                registry.unregister(id);
                router.on_close(&registry, id);
                tracing::info!(
                    connection_id = %id,
                    connections = registry.len(),
                    rooms = router.directory().len(),
                    "Client disconnected"
                );
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) -> RelayResult<()> {
    let ws_stream = accept_async(stream).await?;
    let id = ConnectionId::new();

    let (write, mut read) = ws_stream.split();
    let (tx, rx) = mpsc::unbounded_channel();

    if events
        .send(ConnectionEvent::Opened(Connection::new(id, Some(addr), tx)))
        .is_err()
    {
        // Event loop is gone; the server is shutting down
        return Ok(());
    }

    let writer = tokio::spawn(ConnectionWriter::new(id, write, rx).run());

    while let Some(result) = read.next().await {
        match result {
            Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                if events.send(ConnectionEvent::Frame { id, message }).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            // Pings are answered by tungstenite itself
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    let _ = events.send(ConnectionEvent::Closed(id));
    let _ = writer.await;
    Ok(())
}
