//! WebSocket handler — the connection gateway.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection id and enters a `select!` loop:
//! - Incoming client messages → parse the tagged union + dispatch
//! - Broadcast messages from room peers → forward to the client
//!
//! Replies owed to the sender (`elements:sync`, `room:full`) come back
//! from dispatch and are written directly; everything aimed at peers goes
//! through the room broadcast primitive.
//!
//! LIFECYCLE
//! =========
//! Connected → Joined(room) → Left/Disconnected. Whatever ends the loop —
//! clean close, protocol error, dropped socket — the connection's last
//! joined room is cleaned up exactly once, identical to an explicit
//! `room:leave`. A connection that never joined leaves no trace.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::services;
use crate::services::room::RoomError;
use crate::state::{AppState, RoomCode};

/// Outbound queue depth per connection. A member that falls further
/// behind than this starts missing broadcasts rather than stalling the
/// room.
const OUTBOUND_QUEUE: usize = 256;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();

    // Per-connection channel for receiving broadcast messages from peers.
    let (sender, mut receiver) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

    info!(%conn_id, "ws: client connected");

    // The room this connection is currently joined to, if any.
    let mut current_room: Option<RoomCode> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies =
                            process_message(&state, &mut current_room, conn_id, &sender, &text).await;
                        for reply in replies {
                            let _ = send_message(&mut socket, &reply).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(message) = receiver.recv() => {
                if send_message(&mut socket, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    // Disconnect cleanup: identical to an explicit leave, exactly once.
    if let Some(code) = current_room.take() {
        services::room::leave(&state, &code, conn_id);
    }
    info!(%conn_id, "ws: client disconnected");
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parse and process one inbound text message, returning the messages
/// owed to the sender. Peer fan-out happens inside the services.
///
/// Split from the socket loop so dispatch is testable without a socket.
async fn process_message(
    state: &AppState,
    current_room: &mut Option<RoomCode>,
    conn_id: Uuid,
    sender: &mpsc::Sender<ServerMessage>,
    text: &str,
) -> Vec<ServerMessage> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            // Malformed or unknown-tag input is dropped, never echoed.
            warn!(%conn_id, error = %e, "ws: malformed message dropped");
            return Vec::new();
        }
    };

    match message {
        ClientMessage::RoomJoin { room_code, user_id, user_name } => {
            let code = RoomCode::new(&room_code);

            // Joining a new room implicitly leaves the current one. A
            // re-join of the same room keeps the slot (admission
            // re-entry) and just re-delivers the resync.
            if let Some(previous) = current_room.take() {
                if previous != code {
                    services::room::leave(state, &previous, conn_id);
                }
            }

            match services::room::join(state, &code, conn_id, &user_id, &user_name, sender.clone()).await
            {
                Ok(elements) => {
                    *current_room = Some(code);
                    vec![ServerMessage::ElementsSync(elements)]
                }
                Err(RoomError::RoomFull(code)) => {
                    info!(%conn_id, %code, "ws: join rejected, room full");
                    vec![ServerMessage::RoomFull]
                }
            }
        }
        ClientMessage::RoomLeave(room_code) => {
            let code = RoomCode::new(&room_code);
            if current_room.as_ref() == Some(&code) {
                *current_room = None;
            }
            services::room::leave(state, &code, conn_id);
            Vec::new()
        }
        ClientMessage::ElementCreate { room_code, element } => {
            services::element::create(state, &RoomCode::new(&room_code), conn_id, element);
            Vec::new()
        }
        ClientMessage::ElementUpdate { room_code, element } => {
            services::element::update(state, &RoomCode::new(&room_code), conn_id, element);
            Vec::new()
        }
        ClientMessage::ElementDelete { room_code, element_id } => {
            services::element::delete(state, &RoomCode::new(&room_code), conn_id, element_id);
            Vec::new()
        }
        ClientMessage::CursorMove { room_code, x, y, .. } => {
            services::cursor::broadcast_cursor(state, &RoomCode::new(&room_code), conn_id, x, y);
            Vec::new()
        }
        ClientMessage::ElementsRequest(room_code) => {
            let elements = services::element::resync(state, &RoomCode::new(&room_code));
            vec![ServerMessage::ElementsSync(elements)]
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize message");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
