//! Snapshot service — the persistence collaborator boundary.
//!
//! DESIGN
//! ======
//! The room core never blocks on storage: a room is seeded from
//! `SnapshotStore::load` once at creation (fetched outside the room
//! lock), and a background task periodically writes dirty rooms back.
//! Both sit outside the per-room serialization point.
//!
//! ERROR HANDLING
//! ==============
//! `saved_revision` is acked only after a successful write and only up to
//! the snapshotted revision, so edits that land mid-save keep the room
//! dirty and the next cycle retries. A failed save never touches room
//! state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::element::Element;
use crate::state::{AppState, RoomCode, RoomState, lock_room};

const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 5000;

// =============================================================================
// STORE CONTRACT
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
}

/// External persistence collaborator. `load` seeds a room at creation;
/// `save` records a point-in-time copy of the element log. Durable
/// storage behind this trait is someone else's problem.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, code: &RoomCode) -> Result<Vec<Element>, SnapshotError>;
    async fn save(&self, code: &RoomCode, elements: Vec<Element>) -> Result<(), SnapshotError>;
}

/// Process-lifetime in-memory store. Boards survive room destruction but
/// not a restart.
#[derive(Default)]
pub struct MemoryStore {
    boards: RwLock<HashMap<RoomCode, Vec<Element>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self, code: &RoomCode) -> Result<Vec<Element>, SnapshotError> {
        Ok(self.boards.read().await.get(code).cloned().unwrap_or_default())
    }

    async fn save(&self, code: &RoomCode, elements: Vec<Element>) -> Result<(), SnapshotError> {
        self.boards.write().await.insert(code.clone(), elements);
        Ok(())
    }
}

// =============================================================================
// CONFIG
// =============================================================================

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// PERIODIC SAVER
// =============================================================================

/// Spawn the background snapshot task. Returns a handle for shutdown.
pub fn spawn_snapshot_task(state: AppState) -> JoinHandle<()> {
    let interval_ms = env_parse("SNAPSHOT_INTERVAL_MS", DEFAULT_SNAPSHOT_INTERVAL_MS);
    info!(interval_ms, "room snapshot flush configured");
    tokio::spawn(async move {
        loop {
            save_dirty_rooms(&state).await;
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    })
}

/// Fire-and-forget save of a single snapshot, used for the final copy of
/// a destroyed room.
pub fn spawn_save(store: Arc<dyn SnapshotStore>, code: RoomCode, elements: Vec<Element>) {
    tokio::spawn(async move {
        if let Err(e) = store.save(&code, elements).await {
            warn!(error = %e, %code, "final room snapshot failed");
        }
    });
}

async fn save_dirty_rooms(state: &AppState) {
    let Some(store) = &state.store else {
        return;
    };

    // PHASE: SNAPSHOT DIRTY ROOMS
    // WHY: clone element logs under each room lock, then write lock-free.
    let mut batches: Vec<(RoomCode, Arc<Mutex<RoomState>>, Vec<Element>, u64)> = Vec::new();
    for (code, room) in state.rooms.live_rooms() {
        let guard = lock_room(&room);
        if guard.is_dirty() {
            let elements = guard.elements.snapshot();
            let revision = guard.revision();
            drop(guard);
            batches.push((code, room, elements, revision));
        }
    }

    // PHASE: WRITE + ACK
    // WHY: ack only persisted revisions; failures retry next cycle.
    for (code, room, elements, revision) in batches {
        let count = elements.len();
        match store.save(&code, elements).await {
            Ok(()) => {
                lock_room(&room).ack_saved(revision);
                debug!(%code, count, "room snapshot saved");
            }
            Err(e) => {
                error!(error = %e, %code, "room snapshot failed; retrying next cycle");
            }
        }
    }
}

#[cfg(test)]
pub(crate) async fn save_dirty_rooms_for_tests(state: &AppState) {
    save_dirty_rooms(state).await;
}

// =============================================================================
// TESTS
// =============================================================================
