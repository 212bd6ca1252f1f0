use std::sync::Arc;

use crate::config::RelaySettings;
use crate::ws::{new_connection_registry, ConnectionRegistry};

/// Shared application state passed to both routers via axum State extractor.
///
/// The WebSocket listener and the bridge listener hold clones of the same
/// state, so both entry points fan out through one registry.
#[derive(Clone)]
pub struct AppState {
    /// Live client connections
    pub registry: ConnectionRegistry,
    /// Secret the web application signs client tokens with
    pub jwt_secret: Arc<[u8]>,
    /// Secret backend processes present to the bridge
    pub bridge_secret: Arc<[u8]>,
    pub settings: Arc<RelaySettings>,
}

impl AppState {
    pub fn new(
        jwt_secret: impl Into<Vec<u8>>,
        bridge_secret: impl Into<Vec<u8>>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            registry: new_connection_registry(),
            jwt_secret: Arc::from(jwt_secret.into()),
            bridge_secret: Arc::from(bridge_secret.into()),
            settings: Arc::new(settings),
        }
    }
}
