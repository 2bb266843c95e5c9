//! FIFO pool of waiting sessions

use std::collections::{HashSet, VecDeque};

use duet_core::SessionId;

/// Waiting sessions in arrival order
///
/// Not synchronized on its own; the relay keeps it behind the pool lock so
/// `dequeue_pair` is indivisible with respect to every other queue operation.
#[derive(Debug, Default)]
pub struct MatchQueue {
    order: VecDeque<SessionId>,
    members: HashSet<SessionId>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session at the back. Returns false if it is already queued.
    pub fn enqueue(&mut self, id: SessionId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        true
    }

    /// Take the two oldest waiters, oldest first
    pub fn dequeue_pair(&mut self) -> Option<(SessionId, SessionId)> {
        if self.order.len() < 2 {
            return None;
        }
        let first = self.order.pop_front()?;
        let second = self.order.pop_front()?;
        self.members.remove(&first);
        self.members.remove(&second);
        Some((first, second))
    }

    /// Remove a session if present. Returns whether it was queued.
    pub fn remove(&mut self, id: &SessionId) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.order.retain(|queued| queued != id);
        true
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
