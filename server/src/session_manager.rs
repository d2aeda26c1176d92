//! Process-wide session registry
//!
//! This module owns every live game session and decides which of them are
//! still open for matchmaking:
//! - Session creation with ascending, never reused ids
//! - Open-session tracking for the matchmaker
//! - Teardown the instant a session finishes or loses a participant
//!
//! Each session sits behind its own mutex together with the outbound queues
//! of its participants, so updates to one session are applied one at a time
//! while different sessions proceed independently.

use crate::game::{GameSession, SessionError};
use log::{debug, info, warn};
use shared::{ServerMessage, SessionId, Slot};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

/// Outbound queue of one connection, drained by its writer task.
pub type Outbox = mpsc::Sender<ServerMessage>;

/// Messages a connection may have queued but not yet written. A client that
/// stops reading fills its queue and is disconnected.
pub const OUTBOX_CAPACITY: usize = 64;

/// Handle shared between the registry and the connections seated in a session.
pub type SharedSession = Arc<Mutex<SessionEntry>>;

/// A game session plus the means to reach its participants
pub struct SessionEntry {
    pub game: GameSession,
    outboxes: HashMap<Slot, Outbox>,
}

impl SessionEntry {
    pub fn new(id: SessionId) -> Self {
        Self {
            game: GameSession::new(id),
            outboxes: HashMap::new(),
        }
    }

    /// Seats a participant and remembers where to send its messages.
    pub fn seat(&mut self, slot: Slot, outbox: Outbox) -> Result<(), SessionError> {
        self.game.join(slot)?;
        self.outboxes.insert(slot, outbox);
        Ok(())
    }

    /// Queues a message for `slot` without waiting. A closed queue means the
    /// connection is already gone and the message is dropped. A full queue
    /// means the client stopped reading; its queue is dropped, which closes
    /// the connection.
    pub fn deliver(&mut self, slot: Slot, message: ServerMessage) {
        let Some(outbox) = self.outboxes.get(&slot) else {
            debug!(
                "Session {}: no connection for player {}, dropping message",
                self.game.id(),
                slot
            );
            return;
        };

        match outbox.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Session {}: outbound queue for player {} is full, disconnecting",
                    self.game.id(),
                    slot
                );
                self.outboxes.remove(&slot);
            }
            Err(TrySendError::Closed(_)) => {
                warn!(
                    "Session {}: failed to queue message for player {}: connection closed",
                    self.game.id(),
                    slot
                );
            }
        }
    }

    /// Drops every outbound queue so writer tasks can flush and close.
    pub fn close(&mut self) {
        self.outboxes.clear();
    }

    pub fn is_connected(&self, slot: Slot) -> bool {
        self.outboxes.contains_key(&slot)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub sessions: usize,
    pub open: usize,
}

/// Every live session, keyed by id
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SharedSession>,
    open: BTreeSet<SessionId>,
    next_session_id: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            open: BTreeSet::new(),
            next_session_id: 1,
        }
    }

    /// Creates and registers a new open session.
    pub fn create(&mut self) -> (SessionId, SharedSession) {
        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;

        let session = Arc::new(Mutex::new(SessionEntry::new(id)));
        self.sessions.insert(id, Arc::clone(&session));
        self.open.insert(id);

        info!("Created session {}", id);
        self.log_stats();
        (id, session)
    }

    /// Open sessions, oldest first.
    pub fn open_sessions(&self) -> Vec<(SessionId, SharedSession)> {
        self.open
            .iter()
            .filter_map(|id| self.sessions.get(id).map(|s| (*id, Arc::clone(s))))
            .collect()
    }

    /// Stops offering `id` to the matchmaker.
    pub fn mark_filled(&mut self, id: SessionId) {
        self.open.remove(&id);
    }

    pub fn get(&self, id: SessionId) -> Option<SharedSession> {
        self.sessions.get(&id).cloned()
    }

    /// Removes a session and everything tracked for it. Returns the session
    /// if it was still registered, so the caller can notify survivors.
    pub fn cleanup(&mut self, id: SessionId) -> Option<SharedSession> {
        self.open.remove(&id);
        let removed = self.sessions.remove(&id);
        if removed.is_some() {
            info!("Removed session {}", id);
            self.log_stats();
        }
        removed
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            sessions: self.sessions.len(),
            open: self.open.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn log_stats(&self) {
        let stats = self.stats();
        debug!("Registry: {} sessions, {} open", stats.sessions, stats.open);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
