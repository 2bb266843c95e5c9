//! Server-side handle for one connected participant

use std::collections::HashMap;
use std::time::{Duration, Instant};

use duet_core::{RoomId, SessionId, SessionState};

/// All sessions known to the relay, by id
pub type SessionTable = HashMap<SessionId, Session>;

/// A connected participant
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub room_id: Option<RoomId>,
    last_seen: Instant,
}

impl Session {
    /// A fresh session, waiting to be queued
    pub fn new(id: SessionId) -> Self {
        Self::with_state(id, SessionState::Waiting)
    }

    /// A connection that has not asked to be queued yet
    pub fn unqueued(id: SessionId) -> Self {
        Self::with_state(id, SessionState::Disconnected)
    }

    fn with_state(id: SessionId, state: SessionState) -> Self {
        Self {
            id,
            state,
            room_id: None,
            last_seen: Instant::now(),
        }
    }

    pub fn is_paired(&self) -> bool {
        self.state == SessionState::Paired
    }

    /// Clear room membership and move to `state`
    pub fn reset(&mut self, state: SessionState) {
        self.state = state;
        self.room_id = None;
    }

    /// Record activity
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Check if the session has been silent for longer than `timeout`
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_waiting() {
        let session = Session::new("s1".into());
        assert_eq!(session.state, SessionState::Waiting);
        assert!(session.room_id.is_none());
        assert!(!session.is_paired());
    }

    #[test]
    fn test_reset_clears_room() {
        let mut session = Session::new("s1".into());
        session.state = SessionState::Paired;
        session.room_id = Some("r1".into());

        session.reset(SessionState::Disconnected);
        assert_eq!(session.state, SessionState::Disconnected);
        assert!(session.room_id.is_none());
    }

    #[test]
    fn test_idle_detection() {
        let session = Session::new("s1".into());
        assert!(!session.is_idle(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(session.is_idle(Duration::from_millis(1)));
    }
}
