use shared::connection::{Connection, ConnectionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// What [`ConnectionRegistry::remove`] took out.
pub struct Removed {
    pub connection: Arc<Connection>,
    pub username: Option<String>,
}

/// Live connections, their claimed usernames and last-heartbeat stamps, all keyed by
/// connection id. A connection may be registered without a username; a username never
/// outlives its connection. Locks are always taken connections first, then usernames.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    usernames: RwLock<HashMap<ConnectionId, String>>,
    heartbeats: RwLock<HashMap<ConnectionId, Instant>>,
}

impl ConnectionRegistry {
    /// Registers a connection and stamps its heartbeat to now. Both happen under the
    /// connections lock so a concurrent `remove` never leaves a stray stamp behind.
    pub async fn insert(&self, connection: Arc<Connection>) {
        let id = connection.id();
        let mut connections = self.connections.write().await;
        connections.insert(id, connection);
        self.heartbeats.write().await.insert(id, Instant::now());
    }

    /// Records the username for a registered connection. Returns `false` if the
    /// connection is no longer registered.
    pub async fn set_username(&self, id: ConnectionId, username: &str) -> bool {
        let connections = self.connections.read().await;
        if !connections.contains_key(&id) {
            return false;
        }
        self.usernames.write().await.insert(id, username.to_string());
        true
    }

    pub async fn clear_username(&self, id: ConnectionId) -> Option<String> {
        self.usernames.write().await.remove(&id)
    }

    /// Drops every trace of a connection. Only the first caller for a given id gets
    /// `Some`.
    pub async fn remove(&self, id: ConnectionId) -> Option<Removed> {
        let mut connections = self.connections.write().await;
        let connection = connections.remove(&id)?;
        let username = self.usernames.write().await.remove(&id);
        self.heartbeats.write().await.remove(&id);
        drop(connections);
        Some(Removed {
            connection,
            username,
        })
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(&id).cloned()
    }

    pub async fn username_of(&self, id: ConnectionId) -> Option<String> {
        self.usernames.read().await.get(&id).cloned()
    }

    pub async fn find_by_username(&self, username: &str) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        let usernames = self.usernames.read().await;
        usernames
            .iter()
            .find(|(_, name)| name.as_str() == username)
            .and_then(|(id, _)| connections.get(id).cloned())
    }

    /// Stable copy for iteration; the live map may change underneath.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn usernames(&self) -> Vec<String> {
        self.usernames.read().await.values().cloned().collect()
    }

    pub async fn named_connections(&self) -> Vec<(String, Arc<Connection>)> {
        let connections = self.connections.read().await;
        let usernames = self.usernames.read().await;
        usernames
            .iter()
            .filter_map(|(id, name)| connections.get(id).map(|c| (name.clone(), Arc::clone(c))))
            .collect()
    }

    pub async fn touch(&self, id: ConnectionId) -> bool {
        self.touch_at(id, Instant::now()).await
    }

    /// Stamps a heartbeat for a still-registered connection. A late heartbeat for an
    /// evicted connection is ignored.
    pub(crate) async fn touch_at(&self, id: ConnectionId, at: Instant) -> bool {
        match self.heartbeats.write().await.get_mut(&id) {
            Some(last) => {
                *last = at;
                true
            }
            None => false,
        }
    }

    pub async fn heartbeat_snapshot(&self) -> Vec<(ConnectionId, Instant)> {
        self.heartbeats
            .read()
            .await
            .iter()
            .map(|(id, at)| (*id, *at))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Empties the registry and hands back every connection that was in it.
    pub async fn clear(&self) -> Vec<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        self.usernames.write().await.clear();
        self.heartbeats.write().await.clear();
        connections.drain().map(|(_, c)| c).collect()
    }
}
