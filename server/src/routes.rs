use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the client-facing router: a health check, and the WebSocket upgrade
/// on `/ws` and on every other path, so clients dialing the bare host
/// (`ws://host:port`) connect too.
/// The bridge is served from its own listener, see `bridge::build_bridge_router`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler::ws_upgrade))
        .fallback(ws_handler::ws_upgrade)
        .with_state(state)
}

/// Health check with live connection counts
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.registry.len(),
        "authenticated": state.registry.authenticated_count(),
    }))
}
