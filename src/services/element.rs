//! Element service — create, update, delete, resync.
//!
//! DESIGN
//! ======
//! Element mutations apply to the room's in-memory log under the room
//! lock, bump the revision for the snapshot task, and fan out to every
//! member except the sender. Conflict policy is last-writer-wins per
//! element id, whole-record replace.
//!
//! ERROR HANDLING
//! ==============
//! Room-scoped operations against an unknown room are silent no-ops, so
//! stray messages arriving after a room's destruction land nowhere
//! instead of crashing the dispatcher.

use tracing::debug;
use uuid::Uuid;

use crate::element::Element;
use crate::protocol::ServerMessage;
use crate::state::{AppState, RoomCode, lock_room};

/// Append an element to the room's log. A duplicate id never produces a
/// second entry: the existing record is replaced in place instead.
pub fn create(state: &AppState, code: &RoomCode, sender: Uuid, element: Element) {
    let Some(room) = state.rooms.get(code) else {
        debug!(%code, "element:create for unknown room dropped");
        return;
    };
    let mut guard = lock_room(&room);
    if guard.is_defunct() {
        return;
    }

    guard.elements.upsert(element.clone());
    guard.bump_revision();
    guard.broadcast(&ServerMessage::ElementCreated(element), Some(sender));
}

/// Replace the record with a matching id. No-op (and no broadcast) when
/// the id is not in the log.
pub fn update(state: &AppState, code: &RoomCode, sender: Uuid, element: Element) {
    let Some(room) = state.rooms.get(code) else {
        debug!(%code, "element:update for unknown room dropped");
        return;
    };
    let mut guard = lock_room(&room);
    if guard.is_defunct() {
        return;
    }

    if guard.elements.replace(element.clone()) {
        guard.bump_revision();
        guard.broadcast(&ServerMessage::ElementUpdated(element), Some(sender));
    }
}

/// Remove the record with a matching id. No-op (and no broadcast) when
/// the id is not in the log.
pub fn delete(state: &AppState, code: &RoomCode, sender: Uuid, element_id: String) {
    let Some(room) = state.rooms.get(code) else {
        debug!(%code, "element:delete for unknown room dropped");
        return;
    };
    let mut guard = lock_room(&room);
    if guard.is_defunct() {
        return;
    }

    if guard.elements.remove(&element_id) {
        guard.bump_revision();
        guard.broadcast(&ServerMessage::ElementDeleted(element_id), Some(sender));
    }
}

/// Ordered copy of the room's current log, for `elements:sync`. An
/// unknown room resyncs as empty.
#[must_use]
pub fn resync(state: &AppState, code: &RoomCode) -> Vec<Element> {
    match state.rooms.get(code) {
        Some(room) => lock_room(&room).elements.snapshot(),
        None => Vec::new(),
    }
}
