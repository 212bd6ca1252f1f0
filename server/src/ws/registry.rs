use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use uuid::Uuid;

use crate::auth::Role;
use super::ConnectionSender;

/// Opaque handle of one live WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Authenticated identity attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub role: Role,
}

/// The outbound queue of a connection was already closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection {0} is closed")]
pub struct DeliveryError(pub ConnectionId);

/// Snapshot of one registered connection, detached from the registry lock.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    /// Queue a frame for the connection's writer task. Never blocks.
    pub fn send(&self, message: Message) -> Result<(), DeliveryError> {
        self.sender.send(message).map_err(|_| DeliveryError(self.id))
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    sender: ConnectionSender,
    identity: Option<Identity>,
    subscriptions: BTreeSet<String>,
}

/// Connection registry: every live connection keyed by its handle.
/// One user id may own several entries (multiple devices/tabs).
///
/// Lookups return owned snapshots, so a connection removed while a fan-out
/// is in progress only makes its send fail.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an unauthenticated entry. Registering the same id again replaces it.
    pub fn register(&self, id: ConnectionId, sender: ConnectionSender) {
        self.connections.insert(
            id,
            ConnectionEntry {
                sender,
                identity: None,
                subscriptions: BTreeSet::new(),
            },
        );
        tracing::debug!(
            connection_id = %id,
            connections = self.connections.len(),
            "Connection registered"
        );
    }

    /// Overwrite the identity of a connection. Returns false when the
    /// connection is already gone.
    pub fn set_identity(&self, id: ConnectionId, identity: Identity) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                entry.identity = Some(identity);
                true
            }
            None => false,
        }
    }

    /// Replace (not merge) the subscriptions of a connection. Returns false
    /// when the connection is already gone.
    pub fn set_subscriptions(&self, id: ConnectionId, channels: BTreeSet<String>) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                entry.subscriptions = channels;
                true
            }
            None => false,
        }
    }

    /// Remove a connection. Safe to call any number of times.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            tracing::debug!(
                connection_id = %id,
                connections = self.connections.len(),
                "Connection unregistered"
            );
        }
        removed
    }

    /// Every authenticated connection whose user id is in `user_ids`.
    pub fn find_by_user_ids(&self, user_ids: &BTreeSet<i64>) -> Vec<ConnectionHandle> {
        if user_ids.is_empty() {
            return Vec::new();
        }
        self.select(|identity, _| user_ids.contains(&identity.user_id))
    }

    /// Every authenticated connection with exactly this role.
    pub fn find_by_role(&self, role: &Role) -> Vec<ConnectionHandle> {
        self.select(|identity, _| &identity.role == role)
    }

    /// Every authenticated connection whose role is in `roles`.
    pub fn find_by_roles(&self, roles: &BTreeSet<Role>) -> Vec<ConnectionHandle> {
        self.select(|identity, _| roles.contains(&identity.role))
    }

    /// Connections with this role that subscribed to `channel`.
    pub fn find_by_role_subscribed(&self, role: &Role, channel: &str) -> Vec<ConnectionHandle> {
        self.select(|identity, subscriptions| {
            &identity.role == role && subscriptions.contains(channel)
        })
    }

    fn select<F>(&self, matches: F) -> Vec<ConnectionHandle>
    where
        F: Fn(&Identity, &BTreeSet<String>) -> bool,
    {
        self.connections
            .iter()
            .filter_map(|entry| {
                let identity = entry.identity.as_ref()?;
                matches(identity, &entry.subscriptions).then(|| ConnectionHandle {
                    id: *entry.key(),
                    sender: entry.sender.clone(),
                })
            })
            .collect()
    }

    #[cfg(test)]
    pub fn identity(&self, id: ConnectionId) -> Option<Identity> {
        self.connections.get(&id)?.identity.clone()
    }

    #[cfg(test)]
    pub fn subscriptions(&self, id: ConnectionId) -> Option<BTreeSet<String>> {
        self.connections
            .get(&id)
            .map(|entry| entry.subscriptions.clone())
    }

    #[cfg(test)]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    // Paired with `len` for clippy::len_without_is_empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn authenticated_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.identity.is_some())
            .count()
    }
}
