//! Error types for the signaling relay

use thiserror::Error;

/// Errors raised by the relay's transport and server plumbing
#[derive(Error, Debug)]
pub enum RelayError {
    /// Failed to bind the listening socket
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound
        addr: std::net::SocketAddr,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Connection was closed before the frame could be queued
    #[error("Connection closed")]
    ConnectionClosed,

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Reasons an inbound event left the room directory untouched
///
/// None of these are reported to the client. The router logs them and moves
/// on to the next event.
#[derive(Error, Debug)]
pub enum RouteError {
    /// Inbound bytes were not valid JSON
    #[error("Invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Inbound binary frame was not valid UTF-8
    #[error("Invalid UTF-8 in frame: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// `roomId` was an object or an array, which cannot key a room
    #[error("Unsupported roomId")]
    UnsupportedRoom,

    /// The message referenced a room that does not exist
    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    /// A leave came from a connection that is not a member of the room
    #[error("Connection is not a member of room {0}")]
    StaleMembership(String),
}
