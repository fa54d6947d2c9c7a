//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the room registry: a sharded map from room code to live room
//! state. Each room carries its own member map and element log behind its
//! own mutex, so operations on unrelated rooms never contend and
//! operations on one room apply as a single sequential stream.
//!
//! LOCKING
//! =======
//! Registry structure (create/lookup/remove) is guarded by the `DashMap`
//! shards; room content is guarded by the per-room mutex. Critical
//! sections are synchronous and never held across an `.await`. The
//! `defunct` flag is set under the room lock at the moment a room is
//! unlinked, so a join racing the destruction of an emptied room retries
//! against a fresh entry instead of mutating a detached one.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::element::ElementLog;
use crate::protocol::ServerMessage;
use crate::services::snapshot::SnapshotStore;

// =============================================================================
// ROOM CODE
// =============================================================================

/// Case-normalized room identifier. Knowledge of the code grants
/// membership; it is a sharding key, not a secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Normalize a client-supplied code: trimmed, uppercased.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// MEMBER
// =============================================================================

/// One live connection in a room. `user_id` identifies the logical
/// participant; the map key (connection id) identifies the socket.
#[derive(Debug, Clone)]
pub struct Member {
    pub user_id: String,
    pub user_name: String,
    /// Display color assigned at admission; authoritative for cursors.
    pub color: String,
    pub sender: mpsc::Sender<ServerMessage>,
}

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-room live state: membership and the canonical element log.
pub struct RoomState {
    pub code: RoomCode,
    /// Connected members keyed by connection id.
    pub members: HashMap<Uuid, Member>,
    pub elements: ElementLog,
    /// Bumped on every element mutation.
    revision: u64,
    /// Revision last written to the snapshot store.
    saved_revision: u64,
    /// Set exactly once, under lock, when the room leaves the registry.
    defunct: bool,
}

impl RoomState {
    #[must_use]
    pub fn new(code: RoomCode) -> Self {
        Self {
            code,
            members: HashMap::new(),
            elements: ElementLog::new(),
            revision: 0,
            saved_revision: 0,
            defunct: false,
        }
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_defunct(&self) -> bool {
        self.defunct
    }

    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.revision != self.saved_revision
    }

    /// Acknowledge a completed save. Mutations that landed after the
    /// snapshot keep the room dirty because `revision` has moved on.
    pub fn ack_saved(&mut self, revision: u64) {
        if self.saved_revision < revision {
            self.saved_revision = revision;
        }
    }

    /// Fan a message out to all current members except the optionally
    /// excluded connection. Fire-and-forget: a member whose channel is
    /// full misses this message rather than stalling the room.
    pub fn broadcast(&self, message: &ServerMessage, exclude: Option<Uuid>) {
        for (conn_id, member) in &self.members {
            if exclude == Some(*conn_id) {
                continue;
            }
            let _ = member.sender.try_send(message.clone());
        }
    }
}

/// Lock a room, recovering the guard if a previous holder panicked.
pub fn lock_room(room: &Mutex<RoomState>) -> MutexGuard<'_, RoomState> {
    room.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// ROOM REGISTRY
// =============================================================================

/// Concurrency-safe map from room code to room state. Creation and
/// removal are the only writes to the top-level mapping; everything else
/// goes through the per-room mutex.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomCode, Arc<Mutex<RoomState>>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { rooms: DashMap::new() }
    }

    #[must_use]
    pub fn get(&self, code: &RoomCode) -> Option<Arc<Mutex<RoomState>>> {
        self.rooms.get(code).map(|entry| entry.value().clone())
    }

    /// Get the room for `code`, creating it lazily on first use.
    #[must_use]
    pub fn get_or_create(&self, code: &RoomCode) -> Arc<Mutex<RoomState>> {
        self.rooms
            .entry(code.clone())
            .or_insert_with(|| Arc::new(Mutex::new(RoomState::new(code.clone()))))
            .value()
            .clone()
    }

    /// Unlink the room if its member map is empty. Idempotent. The room
    /// is marked defunct under its own lock before removal so concurrent
    /// joiners holding a stale handle retry against a fresh entry.
    pub fn remove_if_empty(&self, code: &RoomCode) -> bool {
        self.rooms
            .remove_if(code, |_, room| {
                let mut state = lock_room(room);
                if state.members.is_empty() {
                    state.defunct = true;
                    true
                } else {
                    false
                }
            })
            .is_some()
    }

    #[must_use]
    pub fn contains(&self, code: &RoomCode) -> bool {
        self.rooms.contains_key(code)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Snapshot of the current (code, room) pairs. Handles are cloned out
    /// so callers lock rooms without holding registry shards.
    #[must_use]
    pub fn live_rooms(&self) -> Vec<(RoomCode, Arc<Mutex<RoomState>>)> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State
/// extractor. Clone is required by Axum — all inner fields are
/// Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomRegistry>,
    /// Optional persistence collaborator. `None` seeds every room empty.
    pub store: Option<Arc<dyn SnapshotStore>>,
    /// Maximum connections per room.
    pub capacity: usize,
}

impl AppState {
    #[must_use]
    pub fn new(store: Option<Arc<dyn SnapshotStore>>, capacity: usize) -> Self {
        Self { rooms: Arc::new(RoomRegistry::new()), store, capacity }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
