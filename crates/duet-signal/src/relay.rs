//! Matching and handshake relay
//!
//! [`SignalingRelay`] owns the session table, the match queue and the room
//! registry behind a single lock. Every operation takes that lock once,
//! decides what happens, and pushes the resulting events onto per-connection
//! outboxes before releasing it. Outbox sends never block, so no network I/O
//! happens under the lock, and each recipient sees events in exactly the order
//! the pool decided them: a relayed signal can never overtake the `peer-left`
//! that dissolved its room.

use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use duet_core::{ServerMessage, SessionId, SessionState, SignalEnvelope};

use crate::queue::MatchQueue;
use crate::room::RoomRegistry;
use crate::session::{Session, SessionTable};

/// Everything guarded by the pool lock
#[derive(Default)]
struct Pool {
    sessions: SessionTable,
    queue: MatchQueue,
    rooms: RoomRegistry,
}

/// Counters for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub sessions: usize,
    pub waiting: usize,
    pub rooms: usize,
}

/// The relay service shared by all connections
#[derive(Default)]
pub struct SignalingRelay {
    pool: Mutex<Pool>,
    outboxes: DashMap<SessionId, mpsc::UnboundedSender<ServerMessage>>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and return the queue of events for it
    pub fn register(&self, id: SessionId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outboxes.insert(id.clone(), tx);
        self.pool
            .lock()
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Session::unqueued(id));
        rx
    }

    /// Push a message to one connection's outbox
    pub fn deliver(&self, to: &SessionId, msg: ServerMessage) -> bool {
        match self.outboxes.get(to) {
            Some(tx) => tx.send(msg).is_ok(),
            None => {
                debug!("No outbox for session {}, dropping message", to);
                false
            }
        }
    }

    /// Enter the match queue, pairing immediately if someone is waiting
    ///
    /// A session that is still paired abandons its room first; its partner
    /// receives `peer-left`. Joining while already queued changes nothing.
    pub fn join(&self, id: &SessionId) {
        let mut guard = self.pool.lock();
        let pool = &mut *guard;
        self.release_room(pool, id);
        self.enqueue(pool, id);
    }

    /// Leave the current room and re-enter the queue
    pub fn next(&self, id: &SessionId) {
        let mut guard = self.pool.lock();
        let pool = &mut *guard;
        if self.release_room(pool, id) {
            info!("Session {} skipped to next partner", id);
        }
        self.enqueue(pool, id);
    }

    /// Leave the queue or the current room; the connection stays open
    pub fn leave(&self, id: &SessionId) {
        let mut guard = self.pool.lock();
        let pool = &mut *guard;
        self.withdraw(pool, id);
        if let Some(session) = pool.sessions.get_mut(id) {
            session.touch();
            session.reset(SessionState::Disconnected);
        }
    }

    /// Forget a connection entirely; behaves like `leave` for its partner
    pub fn disconnect(&self, id: &SessionId) {
        {
            let mut guard = self.pool.lock();
            let pool = &mut *guard;
            self.withdraw(pool, id);
            pool.sessions.remove(id);
        }
        self.outboxes.remove(id);
        debug!("Session {} removed", id);
    }

    /// Forward a handshake payload to the sender's partner
    ///
    /// `from` is overwritten with `sender`. The payload is dropped unless
    /// `envelope.to` is paired with `sender` in the same room; the handshake
    /// timeout on the client recovers from that. Returns whether it was
    /// delivered.
    pub fn relay_signal(&self, sender: &SessionId, mut envelope: SignalEnvelope) -> bool {
        envelope.from = sender.clone();

        let mut guard = self.pool.lock();
        let pool = &mut *guard;
        if let Some(session) = pool.sessions.get_mut(sender) {
            session.touch();
        }

        let target_paired = pool
            .sessions
            .get(&envelope.to)
            .is_some_and(|session| session.is_paired());
        if !target_paired || pool.rooms.partner_of(&envelope.to) != Some(sender) {
            debug!(
                "Dropping signal from {} to {}: not in a shared room",
                sender, envelope.to
            );
            return false;
        }

        let to = envelope.to.clone();
        self.deliver(&to, envelope.into_delivery())
    }

    /// Record activity for a session
    pub fn touch(&self, id: &SessionId) {
        if let Some(session) = self.pool.lock().sessions.get_mut(id) {
            session.touch();
        }
    }

    /// Disconnect every session silent for longer than `timeout`
    ///
    /// Their outboxes are closed, which ends the owning connection.
    pub fn sweep_idle(&self, timeout: Duration) -> Vec<SessionId> {
        let evicted: Vec<SessionId> = {
            let mut guard = self.pool.lock();
            let pool = &mut *guard;
            let idle: Vec<SessionId> = pool
                .sessions
                .values()
                .filter(|session| session.is_idle(timeout))
                .map(|session| session.id.clone())
                .collect();

            for id in &idle {
                self.withdraw(pool, id);
                pool.sessions.remove(id);
            }
            idle
        };

        for id in &evicted {
            self.outboxes.remove(id);
            info!("Session {} removed (idle timeout)", id);
        }
        evicted
    }

    pub fn session_state(&self, id: &SessionId) -> Option<SessionState> {
        self.pool.lock().sessions.get(id).map(|session| session.state)
    }

    pub fn partner_of(&self, id: &SessionId) -> Option<SessionId> {
        self.pool.lock().rooms.partner_of(id).cloned()
    }

    pub fn stats(&self) -> RelayStats {
        let pool = self.pool.lock();
        RelayStats {
            sessions: pool.sessions.len(),
            waiting: pool.queue.len(),
            rooms: pool.rooms.len(),
        }
    }

    /// Take `id` out of the queue and out of its room, notifying the partner
    fn withdraw(&self, pool: &mut Pool, id: &SessionId) {
        if pool.queue.remove(id) {
            debug!("Session {} left the queue", id);
        }
        self.release_room(pool, id);
    }

    /// Dissolve `id`'s room if it has one. Returns whether it did.
    fn release_room(&self, pool: &mut Pool, id: &SessionId) -> bool {
        if pool.rooms.room_of(id).is_none() {
            return false;
        }
        if let Some(partner) = pool.rooms.dissolve_room(&mut pool.sessions, id) {
            self.deliver(&partner, ServerMessage::PeerLeft);
        }
        true
    }

    fn enqueue(&self, pool: &mut Pool, id: &SessionId) {
        let session = pool
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id.clone()));
        session.touch();

        if !pool.queue.enqueue(id.clone()) {
            debug!("Session {} is already queued", id);
            return;
        }
        session.reset(SessionState::Waiting);
        info!("Session {} joined the queue ({} waiting)", id, pool.queue.len());

        self.pair_waiting(pool);
    }

    /// Pair off waiting sessions, oldest first; the older member initiates
    fn pair_waiting(&self, pool: &mut Pool) {
        while let Some((first, second)) = pool.queue.dequeue_pair() {
            match pool.rooms.create_room(&mut pool.sessions, &first, &second) {
                Ok(room_id) => {
                    self.deliver(
                        &first,
                        ServerMessage::Matched {
                            partner_id: second.clone(),
                            initiator: true,
                            room_id: room_id.clone(),
                        },
                    );
                    self.deliver(
                        &second,
                        ServerMessage::Matched {
                            partner_id: first.clone(),
                            initiator: false,
                            room_id,
                        },
                    );
                }
                Err(e) => {
                    warn!("Failed to pair {} with {}: {}", first, second, e);
                    for id in [first, second] {
                        let requeue = pool
                            .sessions
                            .get(&id)
                            .is_some_and(|session| session.state == SessionState::Waiting);
                        if requeue {
                            pool.queue.enqueue(id);
                        }
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let pool = self.pool.lock();
        for session in pool.sessions.values() {
            let queued = pool.queue.contains(&session.id);
            let room = pool.rooms.room_of(&session.id);
            match session.state {
                SessionState::Waiting => {
                    assert!(queued, "waiting session {} is not queued", session.id);
                    assert!(room.is_none(), "waiting session {} has a room", session.id);
                }
                SessionState::Paired => {
                    assert!(!queued, "paired session {} is queued", session.id);
                    let room = room.expect("paired session without a room");
                    assert_eq!(session.room_id.as_ref(), Some(&room.id));
                    let other = room.other(&session.id).expect("room lacks member");
                    assert_ne!(other, &session.id);
                }
                SessionState::Disconnected => {
                    assert!(!queued, "disconnected session {} is queued", session.id);
                    assert!(room.is_none(), "disconnected session {} has a room", session.id);
                }
            }
            if queued {
                assert_eq!(session.state, SessionState::Waiting);
            }
        }
    }
}
