//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The room engine exposes exactly two endpoints: the websocket upgrade
//! at `/ws` that every client speaks the event catalogue over, and a
//! health probe. Everything else about the product (accounts, board CRUD,
//! export) lives in the surrounding application.

pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
