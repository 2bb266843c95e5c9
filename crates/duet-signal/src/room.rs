//! Two-party rooms and their lifecycle

use std::collections::HashMap;
use std::time::Instant;

use thiserror::Error;
use tracing::info;

use duet_core::{RoomId, SessionId, SessionState};

use crate::session::SessionTable;

/// An active pairing of exactly two distinct sessions
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    members: [SessionId; 2],
    created_at: Instant,
}

impl Room {
    fn new(id: RoomId, a: SessionId, b: SessionId) -> Self {
        Self {
            id,
            members: [a, b],
            created_at: Instant::now(),
        }
    }

    pub fn members(&self) -> &[SessionId; 2] {
        &self.members
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.members.contains(id)
    }

    /// The member that is not `id`, if `id` belongs to this room
    pub fn other(&self, id: &SessionId) -> Option<&SessionId> {
        match &self.members {
            [a, b] if a == id => Some(b),
            [a, b] if b == id => Some(a),
            _ => None,
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// Room errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("cannot pair session {0} with itself")]
    SameSession(SessionId),

    #[error("session {0} is not known")]
    UnknownSession(SessionId),

    #[error("session {0} is already in a room")]
    AlreadyPaired(SessionId),
}

/// Active rooms, indexed by room and by member
///
/// Mutates the session table it is handed so room membership and session
/// state never disagree. Callers hold the pool lock across each call.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    by_session: HashMap<SessionId, RoomId>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `a` and `b` into a new room; both become `Paired`
    pub fn create_room(
        &mut self,
        sessions: &mut SessionTable,
        a: &SessionId,
        b: &SessionId,
    ) -> Result<RoomId, RoomError> {
        if a == b {
            return Err(RoomError::SameSession(a.clone()));
        }
        for id in [a, b] {
            let session = sessions
                .get(id)
                .ok_or_else(|| RoomError::UnknownSession(id.clone()))?;
            if session.is_paired() || self.by_session.contains_key(id) {
                return Err(RoomError::AlreadyPaired(id.clone()));
            }
        }

        let room_id = RoomId::generate();
        for id in [a, b] {
            if let Some(session) = sessions.get_mut(id) {
                session.state = SessionState::Paired;
                session.room_id = Some(room_id.clone());
            }
            self.by_session.insert(id.clone(), room_id.clone());
        }
        self.rooms
            .insert(room_id.clone(), Room::new(room_id.clone(), a.clone(), b.clone()));

        info!("Room {} created for {} and {}", room_id, a, b);
        Ok(room_id)
    }

    /// Remove the room `id` belongs to, if any
    ///
    /// Returns the other member when it is still a live session, so the
    /// caller can notify it. Both members are reset to `Disconnected`; the
    /// caller moves them on from there. A second call for the same room finds
    /// nothing and returns `None`.
    pub fn dissolve_room(&mut self, sessions: &mut SessionTable, id: &SessionId) -> Option<SessionId> {
        let room_id = self.by_session.remove(id)?;
        let room = self.rooms.remove(&room_id)?;

        let mut partner = None;
        for member in room.members() {
            self.by_session.remove(member);
            if let Some(session) = sessions.get_mut(member) {
                session.reset(SessionState::Disconnected);
                if member != id {
                    partner = Some(member.clone());
                }
            }
        }

        info!(
            "Room {} dissolved by {} after {:?}",
            room_id,
            id,
            room.created_at().elapsed()
        );
        partner
    }

    pub fn room_of(&self, id: &SessionId) -> Option<&Room> {
        self.by_session.get(id).and_then(|room_id| self.rooms.get(room_id))
    }

    /// The other member of `id`'s room
    pub fn partner_of(&self, id: &SessionId) -> Option<&SessionId> {
        self.room_of(id).and_then(|room| room.other(id))
    }

    /// Number of active rooms
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn table(ids: &[&str]) -> SessionTable {
        ids.iter()
            .map(|id| (SessionId::from(*id), Session::new(SessionId::from(*id))))
            .collect()
    }

    #[test]
    fn test_create_room_pairs_both_members() {
        let mut sessions = table(&["a", "b"]);
        let mut registry = RoomRegistry::new();

        let room_id = registry
            .create_room(&mut sessions, &"a".into(), &"b".into())
            .unwrap();

        for id in ["a", "b"] {
            let session = &sessions[&SessionId::from(id)];
            assert_eq!(session.state, SessionState::Paired);
            assert_eq!(session.room_id.as_ref(), Some(&room_id));
        }
        assert_eq!(registry.partner_of(&"a".into()), Some(&SessionId::from("b")));
        assert_eq!(registry.partner_of(&"b".into()), Some(&SessionId::from("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_create_room_rejects_self_pairing() {
        let mut sessions = table(&["a"]);
        let mut registry = RoomRegistry::new();

        let err = registry
            .create_room(&mut sessions, &"a".into(), &"a".into())
            .unwrap_err();
        assert_eq!(err, RoomError::SameSession("a".into()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_create_room_rejects_second_room() {
        let mut sessions = table(&["a", "b", "c"]);
        let mut registry = RoomRegistry::new();
        registry
            .create_room(&mut sessions, &"a".into(), &"b".into())
            .unwrap();

        let err = registry
            .create_room(&mut sessions, &"c".into(), &"a".into())
            .unwrap_err();
        assert_eq!(err, RoomError::AlreadyPaired("a".into()));
        assert_eq!(sessions[&SessionId::from("c")].state, SessionState::Waiting);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_create_room_rejects_unknown_session() {
        let mut sessions = table(&["a"]);
        let mut registry = RoomRegistry::new();

        let err = registry
            .create_room(&mut sessions, &"a".into(), &"ghost".into())
            .unwrap_err();
        assert_eq!(err, RoomError::UnknownSession("ghost".into()));
        assert_eq!(sessions[&SessionId::from("a")].state, SessionState::Waiting);
    }

    #[test]
    fn test_dissolve_returns_partner_once() {
        let mut sessions = table(&["a", "b"]);
        let mut registry = RoomRegistry::new();
        registry
            .create_room(&mut sessions, &"a".into(), &"b".into())
            .unwrap();

        assert_eq!(
            registry.dissolve_room(&mut sessions, &"b".into()),
            Some(SessionId::from("a"))
        );
        assert!(registry.dissolve_room(&mut sessions, &"b".into()).is_none());
        assert!(registry.dissolve_room(&mut sessions, &"a".into()).is_none());

        for id in ["a", "b"] {
            let session = &sessions[&SessionId::from(id)];
            assert_eq!(session.state, SessionState::Disconnected);
            assert!(session.room_id.is_none());
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dissolve_with_departed_partner() {
        let mut sessions = table(&["a", "b"]);
        let mut registry = RoomRegistry::new();
        registry
            .create_room(&mut sessions, &"a".into(), &"b".into())
            .unwrap();

        sessions.remove(&SessionId::from("a"));
        assert!(registry.dissolve_room(&mut sessions, &"b".into()).is_none());
        assert!(registry.room_of(&"a".into()).is_none());
    }

    #[test]
    fn test_room_other() {
        let room = Room::new("r".into(), "a".into(), "b".into());
        assert_eq!(room.other(&"a".into()), Some(&SessionId::from("b")));
        assert_eq!(room.other(&"b".into()), Some(&SessionId::from("a")));
        assert!(room.other(&"c".into()).is_none());
        assert!(room.contains(&"a".into()));
    }
}
