//! HTTP bridge through which backend processes push events to clients.
//!
//! Listens on its own port, separate from the WebSocket listener, and shares
//! the connection registry through `AppState`.

pub mod handler;

use axum::routing::post;
use axum::Router;

use crate::state::AppState;

pub use handler::{BridgeError, BridgeRequest};

/// Build the bridge router. Only `POST {bridge_path}` is served; every other
/// path or method answers 404.
pub fn build_bridge_router(state: AppState) -> Router {
    let path = state.settings.bridge_path.clone();
    Router::new()
        .route(
            &path,
            post(handler::notify).fallback(handler::not_found),
        )
        .fallback(handler::not_found)
        .with_state(state)
}
