//! Pairs incoming connections into sessions.

use crate::session_manager::{Outbox, SessionRegistry, SharedSession};
use log::{debug, info};
use shared::{ServerMessage, SessionId, Slot};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Where a connection ended up after matchmaking.
#[derive(Clone)]
pub struct Seat {
    pub session_id: SessionId,
    pub slot: Slot,
    pub session: SharedSession,
}

#[derive(Clone)]
pub struct Matchmaker {
    registry: Arc<RwLock<SessionRegistry>>,
}

impl Matchmaker {
    pub fn new(registry: Arc<RwLock<SessionRegistry>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<RwLock<SessionRegistry>> {
        &self.registry
    }

    /// Seats a new connection in the oldest open session, or in a fresh one
    /// when none is open. The `init` message is queued on `outbox` before
    /// anything else can reach it.
    ///
    /// The registry write lock is held for the whole search, so two
    /// connections never race for the same free slot.
    pub async fn join(&self, outbox: Outbox) -> Seat {
        let mut registry = self.registry.write().await;

        for (session_id, session) in registry.open_sessions() {
            let mut entry = session.lock().await;
            let Some(slot) = entry.game.next_free_slot() else {
                registry.mark_filled(session_id);
                continue;
            };

            match entry.seat(slot, outbox.clone()) {
                Ok(()) => {
                    if !entry.game.is_open() {
                        registry.mark_filled(session_id);
                    }
                    entry.deliver(slot, ServerMessage::Init { slot, session_id });
                    info!("Matched player {} into session {}", slot, session_id);
                    drop(entry);
                    return Seat {
                        session_id,
                        slot,
                        session,
                    };
                }
                Err(e) => {
                    debug!("Skipping session {}: {}", session_id, e);
                    registry.mark_filled(session_id);
                }
            }
        }

        let (session_id, session) = registry.create();
        let slot = Slot::One;
        {
            let mut entry = session.lock().await;
            // A freshly created session always has slot one free.
            if let Err(e) = entry.seat(slot, outbox) {
                debug!("Unexpected refusal from new session {}: {}", session_id, e);
            }
            entry.deliver(slot, ServerMessage::Init { slot, session_id });
        }
        info!("Player {} waiting in new session {}", slot, session_id);

        Seat {
            session_id,
            slot,
            session,
        }
    }
}
