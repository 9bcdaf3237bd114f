//! Wire messages exchanged with signaling clients
//!
//! Inbound messages are parsed leniently: only `type`, `roomId` and
//! `participantId` are inspected, and every other field is left alone so that
//! application messages can be relayed byte-for-byte. A missing `roomId` is a
//! key like any other ([`RoomId::Absent`]), so it never rejects a message.

use crate::error::RouteError;
use crate::state::RoomId;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A message received from a client, classified by its `type` field
///
/// `room_id` is `None` only when `roomId` was an object or an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `{"type": "join", "roomId": ..., "participantId": ...}`
    Join {
        room_id: Option<RoomId>,
        participant_id: Option<String>,
    },
    /// `{"type": "leave", "roomId": ..., "participantId": ...}`
    Leave {
        room_id: Option<RoomId>,
        participant_id: Option<String>,
    },
    /// Any other message. Relayed verbatim to the room named by `roomId`.
    Forward { room_id: Option<RoomId> },
}

/// Read a string field, treating missing and non-string values alike
fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

impl FromStr for ClientMessage {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(s)?;
        let room_id = RoomId::from_json(value.get("roomId"));

        let message = match value.get("type").and_then(Value::as_str) {
            Some("join") => Self::Join {
                room_id,
                participant_id: string_field(&value, "participantId"),
            },
            Some("leave") => Self::Leave {
                room_id,
                participant_id: string_field(&value, "participantId"),
            },
            _ => Self::Forward { room_id },
        };
        Ok(message)
    }
}

/// Notifications generated by the relay itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Someone joined a room the recipient is in
    ParticipantJoined {
        #[serde(skip_serializing_if = "RoomId::is_absent")]
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        participant_id: Option<String>,
        timestamp: i64,
    },
    /// Someone left a room the recipient is in, explicitly or by disconnecting
    ParticipantLeft {
        #[serde(skip_serializing_if = "RoomId::is_absent")]
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        participant_id: Option<String>,
        timestamp: i64,
    },
}

impl ServerEvent {
    pub fn participant_joined(room_id: RoomId, participant_id: Option<String>) -> Self {
        Self::ParticipantJoined {
            room_id,
            participant_id,
            timestamp: now_millis(),
        }
    }

    pub fn participant_left(room_id: RoomId, participant_id: Option<String>) -> Self {
        Self::ParticipantLeft {
            room_id,
            participant_id,
            timestamp: now_millis(),
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
