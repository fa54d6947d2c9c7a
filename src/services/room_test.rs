use super::*;
use crate::services::snapshot::{MemoryStore, SnapshotError, SnapshotStore};
use crate::state::test_helpers::{dummy_element, test_app_state, test_app_state_with_store};
use std::sync::Arc;
use tokio::time::{Duration, sleep};

fn member_channel() -> (mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
    mpsc::channel(32)
}

async fn join_user(
    state: &AppState,
    code: &RoomCode,
    user_id: &str,
) -> (Uuid, mpsc::Receiver<ServerMessage>, Vec<Element>) {
    let conn_id = Uuid::new_v4();
    let (tx, rx) = member_channel();
    let elements = join(state, code, conn_id, user_id, &format!("user {user_id}"), tx)
        .await
        .expect("join should succeed");
    (conn_id, rx, elements)
}

// =============================================================================
// Join
// =============================================================================

#[tokio::test]
async fn first_join_creates_room_and_syncs_empty_log() {
    let state = test_app_state();
    let code = RoomCode::new("AB12CD34EF");

    let (_, mut rx, elements) = join_user(&state, &code, "u1").await;

    assert!(elements.is_empty());
    assert!(state.rooms.contains(&code));
    assert_eq!(
        rx.try_recv().unwrap(),
        ServerMessage::UserJoined { user_id: "u1".into(), user_name: "user u1".into(), user_count: 1 }
    );
}

#[tokio::test]
async fn user_joined_reaches_existing_members_with_new_count() {
    let state = test_app_state();
    let code = RoomCode::new("R");

    let (_, mut rx_a, _) = join_user(&state, &code, "u1").await;
    rx_a.try_recv().expect("own user:joined");

    let (_, mut rx_b, _) = join_user(&state, &code, "u2").await;

    let seen_by_a = rx_a.try_recv().unwrap();
    let seen_by_b = rx_b.try_recv().unwrap();
    let expected =
        ServerMessage::UserJoined { user_id: "u2".into(), user_name: "user u2".into(), user_count: 2 };
    assert_eq!(seen_by_a, expected);
    assert_eq!(seen_by_b, expected);
}

#[tokio::test]
async fn join_at_capacity_is_rejected_without_side_effects() {
    let state = test_app_state();
    let code = RoomCode::new("R");

    let mut peers = Vec::new();
    for i in 0..DEFAULT_ROOM_CAPACITY {
        peers.push(join_user(&state, &code, &format!("u{i}")).await);
    }

    let (tx, _rx) = member_channel();
    let result = join(&state, &code, Uuid::new_v4(), "u-late", "late user", tx).await;
    assert!(matches!(result, Err(RoomError::RoomFull(_))));

    // No state change and no broadcast to the members already inside.
    let room = state.rooms.get(&code).unwrap();
    assert_eq!(lock_room(&room).member_count(), DEFAULT_ROOM_CAPACITY);
    for (_, rx, _) in &mut peers {
        while let Ok(msg) = rx.try_recv() {
            assert!(
                matches!(msg, ServerMessage::UserJoined { .. }),
                "rejected join must not broadcast: {msg:?}"
            );
        }
    }
}

#[tokio::test]
async fn capacity_minus_one_join_fills_the_room() {
    let state = test_app_state();
    let code = RoomCode::new("R");

    for i in 0..DEFAULT_ROOM_CAPACITY - 1 {
        join_user(&state, &code, &format!("u{i}")).await;
    }

    let (_, _, _) = join_user(&state, &code, "u-last").await;
    let room = state.rooms.get(&code).unwrap();
    assert_eq!(lock_room(&room).member_count(), DEFAULT_ROOM_CAPACITY);
}

#[tokio::test]
async fn same_connection_rejoins_a_full_room() {
    let state = test_app_state();
    let code = RoomCode::new("R");

    let (conn_id, _rx, _) = join_user(&state, &code, "u0").await;
    for i in 1..DEFAULT_ROOM_CAPACITY {
        join_user(&state, &code, &format!("u{i}")).await;
    }

    let (tx, _rx2) = member_channel();
    let result = join(&state, &code, conn_id, "u0", "user u0", tx).await;
    assert!(result.is_ok(), "existing connection must be re-admitted");

    let room = state.rooms.get(&code).unwrap();
    assert_eq!(lock_room(&room).member_count(), DEFAULT_ROOM_CAPACITY);
}

#[tokio::test]
async fn same_user_on_two_connections_holds_two_slots() {
    let state = test_app_state();
    let code = RoomCode::new("R");

    join_user(&state, &code, "u1").await;
    join_user(&state, &code, "u1").await;

    let room = state.rooms.get(&code).unwrap();
    assert_eq!(lock_room(&room).member_count(), 2);
}

#[tokio::test]
async fn colors_follow_join_order_modulo_palette() {
    let state = test_app_state();
    let code = RoomCode::new("R");

    let mut conn_ids = Vec::new();
    for i in 0..3 {
        let (conn_id, _, _) = join_user(&state, &code, &format!("u{i}")).await;
        conn_ids.push(conn_id);
    }

    let room = state.rooms.get(&code).unwrap();
    let guard = lock_room(&room);
    for (order, conn_id) in conn_ids.iter().enumerate() {
        assert_eq!(guard.members.get(conn_id).unwrap().color, CURSOR_COLORS[order]);
    }
}

// =============================================================================
// Seeding
// =============================================================================

#[tokio::test]
async fn join_seeds_new_room_from_store() {
    let store = Arc::new(MemoryStore::new());
    let code = RoomCode::new("R");
    store
        .save(&code, vec![dummy_element("e1"), dummy_element("e2")])
        .await
        .unwrap();

    let state = test_app_state_with_store(store);
    let (_, _, elements) = join_user(&state, &code, "u1").await;

    let ids: Vec<&str> = elements.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2"]);
}

#[tokio::test]
async fn seed_applies_only_at_room_creation() {
    let store = Arc::new(MemoryStore::new());
    let code = RoomCode::new("R");
    store.save(&code, vec![dummy_element("e1")]).await.unwrap();

    let state = test_app_state_with_store(store.clone());
    join_user(&state, &code, "u1").await;

    // The store changes while the room is live; the live log wins.
    store.save(&code, vec![dummy_element("ghost")]).await.unwrap();
    let (_, _, elements) = join_user(&state, &code, "u2").await;

    assert_eq!(elements.len(), 1);
    assert_eq!(elements[0].id, "e1");
}

#[tokio::test]
async fn failed_seed_load_still_joins_with_empty_log() {
    struct RefusingStore;

    #[async_trait::async_trait]
    impl SnapshotStore for RefusingStore {
        async fn load(&self, _code: &RoomCode) -> Result<Vec<Element>, SnapshotError> {
            Err(SnapshotError::Unavailable("load refused".into()))
        }

        async fn save(&self, _code: &RoomCode, _elements: Vec<Element>) -> Result<(), SnapshotError> {
            Ok(())
        }
    }

    let state = test_app_state_with_store(Arc::new(RefusingStore));
    let code = RoomCode::new("R");
    let (_, _, elements) = join_user(&state, &code, "u1").await;

    assert!(elements.is_empty());
    assert!(state.rooms.contains(&code));
}

// =============================================================================
// Leave
// =============================================================================

#[tokio::test]
async fn leave_broadcasts_left_and_cursor_remove_to_remaining() {
    let state = test_app_state();
    let code = RoomCode::new("R");

    let (conn_a, _rx_a, _) = join_user(&state, &code, "u1").await;
    let (_, mut rx_b, _) = join_user(&state, &code, "u2").await;
    rx_b.try_recv().expect("own user:joined");

    leave(&state, &code, conn_a);

    assert_eq!(
        rx_b.try_recv().unwrap(),
        ServerMessage::UserLeft { user_id: "u1".into(), user_count: 1 }
    );
    assert_eq!(rx_b.try_recv().unwrap(), ServerMessage::CursorRemove { user_id: "u1".into() });
    assert!(state.rooms.contains(&code), "room persists while a member remains");
}

#[tokio::test]
async fn last_leave_destroys_the_room() {
    let state = test_app_state();
    let code = RoomCode::new("R");

    let (conn_id, _rx, _) = join_user(&state, &code, "u1").await;
    leave(&state, &code, conn_id);

    assert!(!state.rooms.contains(&code));
    assert!(state.rooms.is_empty());
}

#[tokio::test]
async fn leave_is_idempotent() {
    let state = test_app_state();
    let code = RoomCode::new("R");

    let (conn_a, _rx_a, _) = join_user(&state, &code, "u1").await;
    let (_, mut rx_b, _) = join_user(&state, &code, "u2").await;
    rx_b.try_recv().expect("own user:joined");

    leave(&state, &code, conn_a);
    rx_b.try_recv().expect("user:left");
    rx_b.try_recv().expect("cursor:remove");

    // Second leave for the same connection: no broadcast, no change.
    leave(&state, &code, conn_a);
    assert!(rx_b.try_recv().is_err());

    // Leave for a room that never existed: no-op.
    leave(&state, &RoomCode::new("NOPE"), conn_a);
}

#[tokio::test]
async fn destroying_a_dirty_room_saves_a_final_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let state = test_app_state_with_store(store.clone());
    let code = RoomCode::new("R");

    let (conn_id, _rx, _) = join_user(&state, &code, "u1").await;
    {
        let room = state.rooms.get(&code).unwrap();
        let mut guard = lock_room(&room);
        guard.elements.upsert(dummy_element("e1"));
        guard.bump_revision();
    }

    leave(&state, &code, conn_id);
    assert!(!state.rooms.contains(&code));

    // Final save is fire-and-forget; poll briefly for it to land.
    for _ in 0..50 {
        if !store.load(&code).await.unwrap().is_empty() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    let saved = store.load(&code).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, "e1");
}

// =============================================================================
// Join/leave churn
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_churn_settles_to_an_empty_registry() {
    let state = test_app_state();
    let code = RoomCode::new("CHURN");

    let mut tasks = Vec::new();
    for i in 0..4 {
        let state = state.clone();
        let code = code.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                let conn_id = Uuid::new_v4();
                let (tx, _rx) = mpsc::channel(32);
                let joined = join(&state, &code, conn_id, &format!("u{i}"), "churner", tx).await;
                if joined.is_ok() {
                    leave(&state, &code, conn_id);
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(
        !state.rooms.contains(&code),
        "room must be destroyed once the last member leaves"
    );
}

// =============================================================================
// Admission unit checks
// =============================================================================

#[test]
fn try_admit_counts_connections_not_users() {
    let mut room = RoomState::new(RoomCode::new("R"));
    let (tx, _rx) = member_channel();
    for _ in 0..DEFAULT_ROOM_CAPACITY {
        room.members.insert(
            Uuid::new_v4(),
            Member {
                user_id: "same-user".into(),
                user_name: "Same User".into(),
                color: CURSOR_COLORS[0].into(),
                sender: tx.clone(),
            },
        );
    }

    let newcomer = Uuid::new_v4();
    assert!(matches!(
        try_admit(&room, newcomer, DEFAULT_ROOM_CAPACITY),
        Err(RoomError::RoomFull(_))
    ));

    let existing = *room.members.keys().next().unwrap();
    assert!(try_admit(&room, existing, DEFAULT_ROOM_CAPACITY).is_ok());
}
