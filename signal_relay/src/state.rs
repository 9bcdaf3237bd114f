//! Room directory for the signaling relay
//!
//! This module owns every room and its membership list. Rooms are created
//! lazily on first join and removed as soon as their last member is gone.

use crate::connection::ConnectionId;
use serde::{Serialize, Serializer};
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::fmt;

/// Largest integer a JSON client can represent exactly as a double
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Room identifier: the `roomId` scalar exactly as the client sent it
///
/// Clients may omit `roomId` or send a number instead of a string. Every
/// scalar is its own key, so `5` and `"5"` are different rooms and messages
/// without a `roomId` share the [`RoomId::Absent`] room.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// The message carried no `roomId`
    #[default]
    Absent,
    Null,
    Bool(bool),
    Number(Number),
    Name(String),
}

impl RoomId {
    /// Key for a `roomId` field. Objects and arrays cannot name a room.
    pub fn from_json(value: Option<&Value>) -> Option<Self> {
        let id = match value {
            None => Self::Absent,
            Some(Value::Null) => Self::Null,
            Some(Value::Bool(b)) => Self::Bool(*b),
            Some(Value::Number(n)) => Self::Number(normalize_number(n)),
            Some(Value::String(s)) => Self::Name(s.clone()),
            Some(Value::Array(_) | Value::Object(_)) => return None,
        };
        Some(id)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Integral floats compare equal to the matching integer, as they do for
/// JavaScript clients
fn normalize_number(n: &Number) -> Number {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER => {
            Number::from(f as i64)
        }
        _ => n.clone(),
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("<none>"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => fmt::Display::fmt(b, f),
            Self::Number(n) => fmt::Display::fmt(n, f),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Absent => serializer.serialize_none(),
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::Name(name) => serializer.serialize_str(name),
        }
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::Name(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self::Name(id)
    }
}

/// One membership entry: a live connection and the id it claimed on join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub connection: ConnectionId,
    /// Client-supplied and never validated
    pub participant_id: Option<String>,
}

/// A named group of participants
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    /// Join order, which is also broadcast order
    members: Vec<Participant>,
}

impl Room {
    fn new(id: RoomId) -> Self {
        Self {
            id,
            members: Vec::new(),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn members(&self) -> &[Participant] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Connection of every member entry, in join order
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.members.iter().map(|m| m.connection).collect()
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.members.iter().any(|m| m.connection == connection)
    }

    /// Append a member entry. Repeated joins by one connection are kept.
    pub fn push(&mut self, participant: Participant) {
        self.members.push(participant);
    }

    /// Remove the first entry belonging to `connection`
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Option<Participant> {
        let index = self
            .members
            .iter()
            .position(|m| m.connection == connection)?;
        Some(self.members.remove(index))
    }
}

/// Owns the mapping from room id to room state
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, Room>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the room, inserting an empty one if it does not exist yet
    pub fn get_or_create(&mut self, room_id: &RoomId) -> &mut Room {
        self.rooms.entry(room_id.clone()).or_insert_with(|| {
            tracing::info!(room_id = %room_id, "Room created");
            Room::new(room_id.clone())
        })
    }

    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    /// Delete the room if it has no members left. Returns whether it was deleted.
    pub fn remove_if_empty(&mut self, room_id: &RoomId) -> bool {
        let empty = self.rooms.get(room_id).is_some_and(Room::is_empty);
        if empty {
            self.rooms.remove(room_id);
            tracing::info!(room_id = %room_id, "Room deleted");
        }
        empty
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Snapshot of the current room ids, in no particular order
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }
}
