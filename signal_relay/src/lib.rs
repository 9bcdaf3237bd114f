//! Room-based WebSocket signaling relay
//!
//! This crate multiplexes client connections into named rooms and relays
//! messages between the members of a room. It is meant for bootstrapping
//! peer-to-peer sessions: peers exchange offers, answers and ICE candidates
//! through the relay and then talk to each other directly.
//!
//! # Protocol
//!
//! Clients send JSON text frames over a WebSocket.
//!
//! ## Client → server
//!
//! - `{"type": "join", "roomId": "...", "participantId": "..."}`
//! - `{"type": "leave", "roomId": "...", "participantId": "..."}`
//! - any other `type` with a `roomId` is relayed verbatim to every member of
//!   that room, the sender included
//!
//! ## Server → client
//!
//! - `{"type": "participant_joined", "roomId", "participantId", "timestamp"}`
//!   sent to everyone in the room except the joiner
//! - `{"type": "participant_left", "roomId", "participantId", "timestamp"}`
//!   sent to the remaining members after a leave or a disconnect
//!
//! `timestamp` is milliseconds since the Unix epoch. `roomId` keeps the JSON
//! type the client used: `5` and `"5"` are different rooms, and messages
//! without a `roomId` share one room whose notifications omit the field.
//!
//! Nothing is ever sent back to report an error. Malformed frames are logged
//! and dropped, and messages for unknown rooms are ignored.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! signal-relay --port 8080
//!
//! # In two terminals
//! websocat ws://127.0.0.1:8080
//! {"type":"join","roomId":"demo","participantId":"alice"}
//! {"type":"offer","roomId":"demo","sdp":"..."}
//! ```

#![forbid(unsafe_code)]

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod state;

pub use broadcast::Transport;
pub use config::RelayConfig;
pub use connection::ConnectionId;
pub use error::{RelayError, RelayResult, RouteError};
pub use handler::{Outbound, Router};
pub use protocol::{ClientMessage, ServerEvent};
pub use server::RelayServer;
pub use state::{Participant, Room, RoomDirectory, RoomId};
