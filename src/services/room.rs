//! Room service — membership, admission control, presence fan-out.
//!
//! DESIGN
//! ======
//! Rooms are created lazily on first join and destroyed the instant the
//! last member leaves. The seed snapshot is fetched from the store before
//! taking the room lock and applied only if the room is still brand-new
//! once locked (hydrate-then-apply). Join retries when it loses the race
//! against the destruction of an emptied room.
//!
//! ERROR HANDLING
//! ==============
//! `RoomFull` is reported to the rejected joiner only and has no side
//! effects. A failed seed load logs a warning and seeds empty; it never
//! fails the join. Leave is idempotent.

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::element::{Element, ElementLog};
use crate::protocol::ServerMessage;
use crate::services::snapshot;
use crate::state::{AppState, Member, RoomCode, RoomState, lock_room};

// =============================================================================
// TYPES
// =============================================================================

/// Maximum connections per room unless `MAX_ROOM_USERS` overrides it.
pub const DEFAULT_ROOM_CAPACITY: usize = 5;

/// Display colors assigned by join order.
pub const CURSOR_COLORS: [&str; 5] = ["#EF4444", "#3B82F6", "#10B981", "#F59E0B", "#000000"];

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room {0} is at capacity")]
    RoomFull(RoomCode),
}

// =============================================================================
// ADMISSION
// =============================================================================

/// Admission controller. Capacity counts distinct connections, not
/// distinct users: two tabs of the same user hold two slots. A connection
/// that already holds a slot is re-admitted past the cap.
pub(crate) fn try_admit(room: &RoomState, conn_id: Uuid, capacity: usize) -> Result<(), RoomError> {
    if room.members.contains_key(&conn_id) || room.member_count() < capacity {
        Ok(())
    } else {
        Err(RoomError::RoomFull(room.code.clone()))
    }
}

fn assign_color(join_order: usize) -> &'static str {
    CURSOR_COLORS[join_order % CURSOR_COLORS.len()]
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Join a room, creating it if absent. Returns the element log snapshot
/// for the joiner's resync; `user:joined` goes to every member including
/// the joiner.
///
/// # Errors
///
/// Returns `RoomFull` when the room is at capacity and the connection
/// holds no slot.
pub async fn join(
    state: &AppState,
    code: &RoomCode,
    conn_id: Uuid,
    user_id: &str,
    user_name: &str,
    sender: mpsc::Sender<ServerMessage>,
) -> Result<Vec<Element>, RoomError> {
    // Fetch the seed outside the room lock; applied only if this join
    // turns out to create the room.
    let seed = match &state.store {
        Some(store) => match store.load(code).await {
            Ok(elements) => elements,
            Err(e) => {
                warn!(error = %e, %code, "seed load failed; room starts empty");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    loop {
        let room = state.rooms.get_or_create(code);
        {
            let mut guard = lock_room(&room);
            if !guard.is_defunct() {
                try_admit(&guard, conn_id, state.capacity)?;

                if guard.member_count() == 0 && guard.elements.is_empty() && !seed.is_empty() {
                    guard.elements = ElementLog::from_snapshot(seed.clone());
                    info!(%code, count = guard.elements.len(), "seeded room from snapshot store");
                }

                let color = assign_color(guard.member_count());
                guard.members.insert(
                    conn_id,
                    Member {
                        user_id: user_id.to_owned(),
                        user_name: user_name.to_owned(),
                        color: color.to_owned(),
                        sender,
                    },
                );

                let user_count = guard.member_count();
                guard.broadcast(
                    &ServerMessage::UserJoined {
                        user_id: user_id.to_owned(),
                        user_name: user_name.to_owned(),
                        user_count,
                    },
                    None,
                );
                info!(%code, %conn_id, user_count, "member joined room");
                return Ok(guard.elements.snapshot());
            }
        }
        // Lost the race against the destruction of an emptied room; the
        // stale entry is being unlinked, so take a fresh one.
        tokio::task::yield_now().await;
    }
}

/// Remove a connection from a room. Idempotent: a connection that is not
/// a member changes nothing and broadcasts nothing. Remaining members get
/// `user:left` and `cursor:remove`; the room is destroyed when the last
/// member leaves.
pub fn leave(state: &AppState, code: &RoomCode, conn_id: Uuid) {
    let Some(room) = state.rooms.get(code) else {
        return;
    };

    let final_snapshot = {
        let mut guard = lock_room(&room);
        let Some(member) = guard.members.remove(&conn_id) else {
            return;
        };

        let user_count = guard.member_count();
        guard.broadcast(
            &ServerMessage::UserLeft { user_id: member.user_id.clone(), user_count },
            None,
        );
        guard.broadcast(&ServerMessage::CursorRemove { user_id: member.user_id }, None);
        info!(%code, %conn_id, remaining = user_count, "member left room");

        if user_count == 0 && guard.is_dirty() {
            Some(guard.elements.snapshot())
        } else {
            None
        }
    };

    if state.rooms.remove_if_empty(code) {
        info!(%code, "room destroyed (empty)");
        if let (Some(store), Some(elements)) = (&state.store, final_snapshot) {
            snapshot::spawn_save(store.clone(), code.clone(), elements);
        }
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
