mod element;
mod protocol;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use services::snapshot::{MemoryStore, SnapshotStore, env_parse};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3001".into())
        .parse()
        .expect("invalid PORT");
    let capacity: usize = env_parse("MAX_ROOM_USERS", services::room::DEFAULT_ROOM_CAPACITY);

    let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
    let state = state::AppState::new(Some(store), capacity);

    // Spawn background snapshot task.
    let _snapshot = services::snapshot::spawn_snapshot_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, capacity, "sketchroom listening");
    axum::serve(listener, app).await.expect("server failed");
}
