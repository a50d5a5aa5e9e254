use std::collections::HashMap;

use log::warn;

use crate::session::Session;

/// Owns at most one live [`Session`] per room.
///
/// The registry does no locking of its own; it is driven from the single
/// task that processes chat commands.
pub struct Registry {
    sessions: HashMap<String, Session>,
}

impl Registry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Get a reference to the session for `room`.
    pub fn get(&self, room: &str) -> Option<&Session> {
        self.sessions.get(room)
    }

    /// Get a mutable reference to the session for `room`.
    pub fn get_mut(&mut self, room: &str) -> Option<&mut Session> {
        self.sessions.get_mut(room)
    }

    /// Install `session` for `room`, returning whatever it displaced.
    ///
    /// The caller is responsible for stopping the returned session.
    pub fn put(&mut self, room: impl Into<String>, session: Session) -> Option<Session> {
        self.sessions.insert(room.into(), session)
    }

    /// Remove and return the session for `room`.
    pub fn remove(&mut self, room: &str) -> Option<Session> {
        self.sessions.remove(room)
    }

    pub fn contains(&self, room: &str) -> bool {
        self.sessions.contains_key(room)
    }

    /// Room keys with a session, sorted.
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.sessions.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop and remove every session. Used at shutdown.
    pub fn stop_all(&mut self) {
        for (room, mut session) in self.sessions.drain() {
            if let Err(e) = session.stop() {
                warn!("failed to stop session for &{room}: {e}");
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
