pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod messages;
pub mod protocol;
pub mod registry;

use tokio::sync::mpsc;

pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryError, Identity};

/// Type alias for the sender half of a WebSocket connection's channel.
/// Fan-out clones this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> ConnectionRegistry {
    ConnectionRegistry::new()
}
