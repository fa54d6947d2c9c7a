//! Wire protocol — the message catalogue spoken over `/ws`.
//!
//! DESIGN
//! ======
//! Every message is `{"event": <name>, "data": <payload>}`. The catalogue
//! is a closed tagged union: one variant per event name, so dispatch is
//! exhaustive and an unknown tag fails to parse instead of silently
//! routing nowhere. Payload fields are camelCase to match the web client.

use serde::{Deserialize, Serialize};

use crate::element::Element;

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

/// Operations a connected client may submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "room:join", rename_all = "camelCase")]
    RoomJoin {
        room_code: String,
        user_id: String,
        user_name: String,
    },
    /// Payload is the bare room code.
    #[serde(rename = "room:leave")]
    RoomLeave(String),
    #[serde(rename = "element:create", rename_all = "camelCase")]
    ElementCreate { room_code: String, element: Element },
    #[serde(rename = "element:update", rename_all = "camelCase")]
    ElementUpdate { room_code: String, element: Element },
    #[serde(rename = "element:delete", rename_all = "camelCase")]
    ElementDelete { room_code: String, element_id: String },
    /// Identity and color are accepted for client compatibility but the
    /// server-assigned member identity is authoritative on broadcast.
    #[serde(rename = "cursor:move", rename_all = "camelCase")]
    CursorMove {
        room_code: String,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        user_name: Option<String>,
        x: f64,
        y: f64,
        #[serde(default)]
        color: Option<String>,
    },
    /// Payload is the bare room code. Triggers the same resync as join.
    #[serde(rename = "elements:request")]
    ElementsRequest(String),
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// Events fanned out to room members or returned to a requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    /// Full element log, sent to a joiner or resync requester only.
    #[serde(rename = "elements:sync")]
    ElementsSync(Vec<Element>),
    #[serde(rename = "element:created")]
    ElementCreated(Element),
    #[serde(rename = "element:updated")]
    ElementUpdated(Element),
    /// Payload is the deleted element id.
    #[serde(rename = "element:deleted")]
    ElementDeleted(String),
    #[serde(rename = "user:joined", rename_all = "camelCase")]
    UserJoined {
        user_id: String,
        user_name: String,
        user_count: usize,
    },
    #[serde(rename = "user:left", rename_all = "camelCase")]
    UserLeft { user_id: String, user_count: usize },
    /// Sent only to the rejected joiner. No payload.
    #[serde(rename = "room:full")]
    RoomFull,
    #[serde(rename = "cursor:move", rename_all = "camelCase")]
    CursorMove {
        user_id: String,
        user_name: String,
        x: f64,
        y: f64,
        color: String,
    },
    #[serde(rename = "cursor:remove", rename_all = "camelCase")]
    CursorRemove { user_id: String },
}

// =============================================================================
// TESTS
// =============================================================================
