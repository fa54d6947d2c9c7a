//! Cursor service — ephemeral cursor position broadcast.
//!
//! DESIGN
//! ======
//! Cursor positions are purely ephemeral: broadcast to room peers and
//! immediately forgotten. They never enter the element log, never appear
//! in a resync, and never reach the snapshot store. Identity and color on
//! the outgoing payload come from the sender's member record; the
//! server-assigned color is authoritative.

use uuid::Uuid;

use crate::protocol::ServerMessage;
use crate::state::{AppState, RoomCode, lock_room};

/// Broadcast a cursor position to all room peers except the sender.
/// Dropped when the room is unknown or the sender is not a member.
pub fn broadcast_cursor(state: &AppState, code: &RoomCode, sender: Uuid, x: f64, y: f64) {
    let Some(room) = state.rooms.get(code) else {
        return;
    };
    let guard = lock_room(&room);
    let Some(member) = guard.members.get(&sender) else {
        return;
    };

    let message = ServerMessage::CursorMove {
        user_id: member.user_id.clone(),
        user_name: member.user_name.clone(),
        x,
        y,
        color: member.color.clone(),
    };
    guard.broadcast(&message, Some(sender));
}
