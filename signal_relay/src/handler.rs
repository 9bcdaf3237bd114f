//! Message routing for the signaling relay
//!
//! Each inbound event is handled to completion before the next one: the
//! router parses it, updates the [`RoomDirectory`], and returns the
//! notifications that should go out. Delivery is a separate step so the
//! state transitions can be tested without a live transport.

use crate::broadcast::{Transport, broadcast};
use crate::connection::ConnectionId;
use crate::error::RouteError;
use crate::protocol::{ClientMessage, ServerEvent};
use crate::state::{Participant, RoomDirectory, RoomId};

/// One payload and the connections it should be offered to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub recipients: Vec<ConnectionId>,
    pub payload: String,
}

fn notify(recipients: Vec<ConnectionId>, event: ServerEvent) -> Vec<Outbound> {
    if recipients.is_empty() {
        return Vec::new();
    }
    vec![Outbound {
        recipients,
        payload: event.to_string(),
    }]
}

/// Offer every outbound payload to its recipients
pub fn deliver<T: Transport + ?Sized>(transport: &T, outbound: &[Outbound]) {
    for message in outbound {
        broadcast(transport, &message.recipients, &message.payload);
    }
}

/// Parses inbound frames and applies them to the room directory
#[derive(Debug, Default)]
pub struct Router {
    directory: RoomDirectory,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directory(directory: RoomDirectory) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    pub fn into_directory(self) -> RoomDirectory {
        self.directory
    }

    /// Handle a frame from `connection` and deliver the resulting notifications
    ///
    /// Failures are logged and otherwise ignored; the client is never told.
    pub fn on_message<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        connection: ConnectionId,
        frame: &[u8],
    ) {
        match self.route(connection, frame) {
            Ok(outbound) => deliver(transport, &outbound),
            Err(e @ (RouteError::Parse(_) | RouteError::Utf8(_))) => {
                tracing::warn!(connection_id = %connection, error = %e, "Error parsing message");
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection, reason = %e, "Message dropped");
            }
        }
    }

    /// Handle the transport reporting that `connection` has closed
    pub fn on_close<T: Transport + ?Sized>(&mut self, transport: &T, connection: ConnectionId) {
        let outbound = self.disconnect(connection);
        deliver(transport, &outbound);
    }

    /// Parse a frame and dispatch it by message type
    pub fn route(
        &mut self,
        connection: ConnectionId,
        frame: &[u8],
    ) -> Result<Vec<Outbound>, RouteError> {
        let text = std::str::from_utf8(frame)?;
        let message: ClientMessage = text.parse()?;
        tracing::debug!(connection_id = %connection, request = ?message, "Received message");

        match message {
            ClientMessage::Join {
                room_id,
                participant_id,
            } => {
                let room_id = room_id.ok_or(RouteError::UnsupportedRoom)?;
                Ok(self.join(connection, room_id, participant_id))
            }
            ClientMessage::Leave {
                room_id,
                participant_id,
            } => {
                let room_id = room_id.ok_or(RouteError::UnsupportedRoom)?;
                self.leave(connection, room_id, participant_id)
            }
            ClientMessage::Forward { room_id } => {
                let room_id = room_id.ok_or(RouteError::UnsupportedRoom)?;
                self.forward(&room_id, text)
            }
        }
    }

    /// Add `connection` to the room and tell everyone else in it
    pub fn join(
        &mut self,
        connection: ConnectionId,
        room_id: RoomId,
        participant_id: Option<String>,
    ) -> Vec<Outbound> {
        let room = self.directory.get_or_create(&room_id);
        room.push(Participant {
            connection,
            participant_id: participant_id.clone(),
        });
        tracing::info!(
            connection_id = %connection,
            room_id = %room_id,
            participant_id = ?participant_id,
            "Participant joined room"
        );

        let others: Vec<ConnectionId> = room
            .connections()
            .into_iter()
            .filter(|c| *c != connection)
            .collect();
        notify(others, ServerEvent::participant_joined(room_id, participant_id))
    }

    /// Remove the first membership entry held by `connection`
    ///
    /// Matching is by connection only. `participant_id` is echoed in the
    /// notification as supplied.
    pub fn leave(
        &mut self,
        connection: ConnectionId,
        room_id: RoomId,
        participant_id: Option<String>,
    ) -> Result<Vec<Outbound>, RouteError> {
        let room = self
            .directory
            .get_mut(&room_id)
            .ok_or_else(|| RouteError::UnknownRoom(room_id.to_string()))?;
        if room.remove_connection(connection).is_none() {
            return Err(RouteError::StaleMembership(room_id.to_string()));
        }
        tracing::info!(
            connection_id = %connection,
            room_id = %room_id,
            participant_id = ?participant_id,
            "Participant left room"
        );

        let remaining = room.connections();
        let outbound = notify(
            remaining,
            ServerEvent::participant_left(room_id.clone(), participant_id),
        );
        self.directory.remove_if_empty(&room_id);
        Ok(outbound)
    }

    /// Drop `connection` from every room it is in
    pub fn disconnect(&mut self, connection: ConnectionId) -> Vec<Outbound> {
        let mut outbound = Vec::new();

        for room_id in self.directory.room_ids() {
            let Some(room) = self.directory.get_mut(&room_id) else {
                continue;
            };
            let Some(removed) = room.remove_connection(connection) else {
                continue;
            };
            tracing::info!(
                connection_id = %connection,
                room_id = %room_id,
                participant_id = ?removed.participant_id,
                "Client removed from room"
            );

            let remaining = room.connections();
            outbound.extend(notify(
                remaining,
                ServerEvent::participant_left(room_id.clone(), removed.participant_id),
            ));
            self.directory.remove_if_empty(&room_id);
        }

        outbound
    }

    /// Relay `raw` unchanged to every member of the room, sender included
    pub fn forward(&self, room_id: &RoomId, raw: &str) -> Result<Vec<Outbound>, RouteError> {
        let room = self
            .directory
            .get(room_id)
            .ok_or_else(|| RouteError::UnknownRoom(room_id.to_string()))?;

        Ok(vec![Outbound {
            recipients: room.connections(),
            payload: raw.to_owned(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayResult;
    use serde_json::Value;
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};

    /// In-memory transport that records every frame per connection
    #[derive(Default)]
    struct MockTransport {
        closed: RefCell<HashSet<ConnectionId>>,
        inbox: RefCell<HashMap<ConnectionId, Vec<String>>>,
    }

    impl MockTransport {
        fn close(&self, connection: ConnectionId) {
            self.closed.borrow_mut().insert(connection);
        }

        fn take(&self, connection: ConnectionId) -> Vec<String> {
            self.inbox
                .borrow_mut()
                .remove(&connection)
                .unwrap_or_default()
        }

        fn take_json(&self, connection: ConnectionId) -> Vec<Value> {
            self.take(connection)
                .iter()
                .map(|frame| serde_json::from_str(frame).unwrap())
                .collect()
        }

        fn total_sent(&self) -> usize {
            self.inbox.borrow().values().map(Vec::len).sum()
        }
    }

    impl Transport for MockTransport {
        fn is_open(&self, connection: ConnectionId) -> bool {
            !self.closed.borrow().contains(&connection)
        }

        fn send(&self, connection: ConnectionId, payload: &str) -> RelayResult<()> {
            self.inbox
                .borrow_mut()
                .entry(connection)
                .or_default()
                .push(payload.to_string());
            Ok(())
        }
    }

    fn join_frame(room: &str, participant: &str) -> Vec<u8> {
        format!(r#"{{"type":"join","roomId":"{room}","participantId":"{participant}"}}"#)
            .into_bytes()
    }

    fn leave_frame(room: &str, participant: &str) -> Vec<u8> {
        format!(r#"{{"type":"leave","roomId":"{room}","participantId":"{participant}"}}"#)
            .into_bytes()
    }

    fn room(name: &str) -> RoomId {
        RoomId::from(name)
    }

    fn assert_no_empty_rooms(router: &Router) {
        assert!(router.directory().rooms().all(|room| !room.is_empty()));
    }

    #[test]
    fn join_notifies_others_not_self() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();

        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        assert_eq!(transport.total_sent(), 0);

        router.on_message(&transport, bob, &join_frame("r1", "bob"));
        let received = transport.take_json(alice);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["type"], "participant_joined");
        assert_eq!(received[0]["roomId"], "r1");
        assert_eq!(received[0]["participantId"], "bob");
        assert!(received[0]["timestamp"].as_i64().unwrap() > 0);
        assert!(transport.take(bob).is_empty());
    }

    #[test]
    fn forward_includes_sender_and_preserves_payload() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        router.on_message(&transport, bob, &join_frame("r1", "bob"));
        transport.take(alice);

        let chat = r#"{"type":"chat", "roomId":"r1", "text":"hi", "nested":{"z":1,"a":[true,null]}}"#;
        router.on_message(&transport, alice, chat.as_bytes());

        assert_eq!(transport.take(alice), vec![chat.to_string()]);
        assert_eq!(transport.take(bob), vec![chat.to_string()]);
    }

    #[test]
    fn leave_of_last_member_deletes_room() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();

        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        assert!(router.directory().contains(&room("r1")));

        router.on_message(&transport, alice, &leave_frame("r1", "alice"));
        assert!(!router.directory().contains(&room("r1")));
        assert_eq!(transport.total_sent(), 0);
    }

    #[test]
    fn leave_notifies_remaining_with_claimed_id() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        router.on_message(&transport, bob, &join_frame("r1", "bob"));
        transport.take(alice);

        // The id in the leave message is echoed even if it was never joined
        router.on_message(&transport, bob, &leave_frame("r1", "mallory"));

        let received = transport.take_json(alice);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["type"], "participant_left");
        assert_eq!(received[0]["participantId"], "mallory");
        assert!(transport.take(bob).is_empty());
        assert_eq!(router.directory().get(&room("r1")).unwrap().connections(), vec![alice]);
    }

    #[test]
    fn leave_from_unknown_room_or_non_member_is_noop() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        router.on_message(&transport, alice, &join_frame("r1", "alice"));

        let err = router.route(bob, &leave_frame("nope", "bob")).unwrap_err();
        assert!(matches!(err, RouteError::UnknownRoom(_)));

        let err = router.route(bob, &leave_frame("r1", "alice")).unwrap_err();
        assert!(matches!(err, RouteError::StaleMembership(_)));

        assert_eq!(router.directory().get(&room("r1")).unwrap().len(), 1);
        assert_eq!(transport.total_sent(), 0);
    }

    #[test]
    fn disconnect_mirrors_leave() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        router.on_message(&transport, bob, &join_frame("r1", "bob"));
        transport.take(alice);

        transport.close(bob);
        router.on_close(&transport, bob);

        let received = transport.take_json(alice);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["type"], "participant_left");
        assert_eq!(received[0]["roomId"], "r1");
        assert_eq!(received[0]["participantId"], "bob");
        assert_eq!(router.directory().get(&room("r1")).unwrap().connections(), vec![alice]);

        transport.close(alice);
        router.on_close(&transport, alice);
        assert!(!router.directory().contains(&room("r1")));
        assert_no_empty_rooms(&router);
    }

    #[test]
    fn disconnect_removes_connection_from_every_room() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        let carol = ConnectionId::new();
        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        router.on_message(&transport, alice, &join_frame("r2", "alice-2"));
        router.on_message(&transport, alice, &join_frame("r3", "alice-3"));
        router.on_message(&transport, bob, &join_frame("r1", "bob"));
        router.on_message(&transport, carol, &join_frame("r2", "carol"));
        transport.take(alice);

        router.on_close(&transport, alice);

        for room in router.directory().rooms() {
            assert!(!room.contains(alice));
        }
        assert!(!router.directory().contains(&room("r3")));
        assert_eq!(transport.take_json(bob)[0]["participantId"], "alice");
        assert_eq!(transport.take_json(carol)[0]["participantId"], "alice-2");
        assert_no_empty_rooms(&router);
    }

    #[test]
    fn repeated_disconnect_is_idempotent() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        router.on_message(&transport, bob, &join_frame("r1", "bob"));

        router.on_close(&transport, bob);
        let sent = transport.total_sent();
        let rooms = router.directory().len();

        router.on_close(&transport, bob);
        assert_eq!(transport.total_sent(), sent);
        assert_eq!(router.directory().len(), rooms);
        assert!(router.disconnect(bob).is_empty());
    }

    #[test]
    fn rooms_are_isolated() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        router.on_message(&transport, bob, &join_frame("r2", "bob"));

        router.on_message(
            &transport,
            bob,
            br#"{"type":"offer","roomId":"r2","sdp":"v=0"}"#,
        );
        router.on_message(&transport, bob, &leave_frame("r2", "bob"));

        assert!(transport.take(alice).is_empty());
    }

    #[test]
    fn closed_members_are_skipped_but_kept() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        let carol = ConnectionId::new();
        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        router.on_message(&transport, bob, &join_frame("r1", "bob"));
        transport.close(bob);

        router.on_message(&transport, carol, &join_frame("r1", "carol"));

        assert_eq!(transport.take_json(alice).len(), 2);
        assert!(transport.take(bob).is_empty());
        assert!(router.directory().get(&room("r1")).unwrap().contains(bob));
    }

    #[test]
    fn malformed_frames_change_nothing() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        router.on_message(&transport, alice, &join_frame("r1", "alice"));

        assert!(matches!(
            router.route(alice, b"{\"type\":\"join\""),
            Err(RouteError::Parse(_))
        ));
        assert!(matches!(
            router.route(alice, &[0xff, 0xfe]),
            Err(RouteError::Utf8(_))
        ));
        assert!(matches!(
            router.route(alice, br#"{"type":"chat","text":"no room"}"#),
            Err(RouteError::UnknownRoom(_))
        ));
        assert!(matches!(
            router.route(alice, br#"{"type":"join","roomId":{"name":"r1"}}"#),
            Err(RouteError::UnsupportedRoom)
        ));
        assert!(matches!(
            router.route(alice, br#"{"type":"chat","roomId":"ghost"}"#),
            Err(RouteError::UnknownRoom(_))
        ));

        assert_eq!(router.directory().len(), 1);
        assert_eq!(router.directory().get(&room("r1")).unwrap().len(), 1);
        assert_eq!(transport.total_sent(), 0);
    }

    #[test]
    fn duplicate_join_keeps_both_entries() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        router.on_message(&transport, bob, &join_frame("r1", "bob"));

        // Alice is listed twice, so she hears about bob twice
        assert_eq!(transport.take(alice).len(), 2);

        router.on_message(&transport, alice, &leave_frame("r1", "alice"));
        let room = router.directory().get(&room("r1")).unwrap();
        assert_eq!(room.connections(), vec![alice, bob]);
    }

    #[test]
    fn join_without_participant_id_omits_it() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        router.on_message(&transport, alice, &join_frame("r1", "alice"));
        router.on_message(&transport, bob, br#"{"type":"join","roomId":"r1"}"#);

        let received = transport.take_json(alice);
        assert_eq!(received.len(), 1);
        assert!(received[0].get("participantId").is_none());
        assert_eq!(
            router.directory().get(&room("r1")).unwrap().members()[1].participant_id,
            None
        );
    }

    #[test]
    fn directory_survives_router_teardown() {
        let mut router = Router::new();
        let alice = ConnectionId::new();
        router.join(alice, RoomId::from("r1"), Some("alice".to_string()));

        let directory = router.into_directory();
        let router = Router::with_directory(directory);
        assert!(router.directory().get(&room("r1")).unwrap().contains(alice));
    }

    #[test]
    fn join_without_room_id_shares_the_absent_room() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();

        router.on_message(&transport, alice, br#"{"type":"join","participantId":"alice"}"#);
        router.on_message(&transport, bob, br#"{"type":"join","participantId":"bob"}"#);

        let received = transport.take_json(alice);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["type"], "participant_joined");
        assert_eq!(received[0]["participantId"], "bob");
        assert!(received[0].get("roomId").is_none());
        assert!(transport.take(bob).is_empty());
        assert_eq!(
            router.directory().get(&RoomId::Absent).unwrap().connections(),
            vec![alice, bob]
        );

        // Forward and leave without a roomId address the same room
        let chat = r#"{"type":"chat","text":"hi"}"#;
        router.on_message(&transport, bob, chat.as_bytes());
        assert_eq!(transport.take(alice), vec![chat.to_string()]);
        assert_eq!(transport.take(bob), vec![chat.to_string()]);

        router.on_message(&transport, bob, br#"{"type":"leave","participantId":"bob"}"#);
        let left = transport.take_json(alice);
        assert_eq!(left[0]["type"], "participant_left");
        assert!(left[0].get("roomId").is_none());
        assert_eq!(
            router.directory().get(&RoomId::Absent).unwrap().connections(),
            vec![alice]
        );
    }

    #[test]
    fn numeric_room_ids_are_distinct_from_strings() {
        let transport = MockTransport::default();
        let mut router = Router::new();
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        let carol = ConnectionId::new();

        router.on_message(&transport, alice, br#"{"type":"join","roomId":5,"participantId":"alice"}"#);
        router.on_message(&transport, bob, br#"{"type":"join","roomId":"5","participantId":"bob"}"#);
        assert_eq!(transport.total_sent(), 0);
        assert_eq!(router.directory().len(), 2);

        router.on_message(&transport, carol, br#"{"type":"join","roomId":5.0,"participantId":"carol"}"#);
        let received = transport.take_json(alice);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["roomId"], 5);
        assert_eq!(received[0]["participantId"], "carol");
        assert!(transport.take(bob).is_empty());
        assert_no_empty_rooms(&router);
    }
}
