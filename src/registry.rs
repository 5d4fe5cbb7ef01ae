use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::messages::{ConnectionId, RoomId, UserId};
use crate::outbound::Outbound;
use crate::room::Scope;

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Attached by the upstream identity check, if any.
    pub user_id: Option<UserId>,
    pub rooms: HashSet<(Scope, RoomId)>,
    pub outbound: Outbound,
}

impl Connection {
    /// Identity shown to other peers: the user id, or the connection id for
    /// anonymous connections.
    pub fn peer_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

/// Live connections and the rooms each has joined.
///
/// Lock order: a room lock may be held while calling into the registry,
/// never the other way around.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id() -> ConnectionId {
        Uuid::new_v4().to_string()
    }

    pub async fn register(&self, id: ConnectionId, user_id: Option<UserId>, outbound: Outbound) {
        let mut inner = self.inner.write().await;
        // anonymous connections are reachable under their connection id
        let peer_id = user_id.clone().unwrap_or_else(|| id.clone());
        inner.by_user.entry(peer_id).or_default().insert(id.clone());
        inner.connections.insert(
            id.clone(),
            Connection {
                id,
                user_id,
                rooms: HashSet::new(),
                outbound,
            },
        );
    }

    /// Drops the connection record. Room membership must already be cleared.
    pub async fn unregister(&self, id: &str) -> Option<Connection> {
        let mut inner = self.inner.write().await;
        let connection = inner.connections.remove(id)?;
        let peer_id = connection.peer_id();
        if let Some(ids) = inner.by_user.get_mut(peer_id) {
            ids.remove(id);
            if ids.is_empty() {
                inner.by_user.remove(peer_id);
            }
        }
        Some(connection)
    }

    /// Returns the peer identity and outbound handle of a live connection.
    pub async fn handle(&self, id: &str) -> Option<(UserId, Outbound)> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(id)
            .map(|c| (c.peer_id().to_string(), c.outbound.clone()))
    }

    pub async fn user_id(&self, id: &str) -> Option<UserId> {
        let inner = self.inner.read().await;
        inner.connections.get(id).and_then(|c| c.user_id.clone())
    }

    pub async fn rooms_of(&self, id: &str) -> HashSet<(Scope, RoomId)> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(id)
            .map(|c| c.rooms.clone())
            .unwrap_or_default()
    }

    /// Returns `false` if the connection is no longer registered.
    #[must_use]
    pub async fn add_room(&self, id: &str, scope: Scope, room_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.connections.get_mut(id) {
            Some(c) => {
                c.rooms.insert((scope, room_id.to_string()));
                true
            }
            None => false,
        }
    }

    pub async fn remove_room(&self, id: &str, scope: Scope, room_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(c) = inner.connections.get_mut(id) {
            c.rooms.remove(&(scope, room_id.to_string()));
        }
    }

    /// Outbound handles of every connection registered under `user_id`, or of
    /// the anonymous connection whose id is `user_id`.
    pub async fn connections_of_user(&self, user_id: &str) -> Vec<Outbound> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_user.get(user_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.connections.get(id))
            .map(|c| c.outbound.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::OUTBOUND_CAPACITY;

    async fn register(registry: &ConnectionRegistry, id: &str, user: Option<&str>) {
        let (outbound, _rx) = Outbound::channel(id.into(), OUTBOUND_CAPACITY);
        registry
            .register(id.into(), user.map(str::to_string), outbound)
            .await;
    }

    #[tokio::test]
    async fn indexes_connections_by_user() {
        let registry = ConnectionRegistry::new();
        register(&registry, "c1", Some("alice")).await;
        register(&registry, "c2", Some("alice")).await;
        register(&registry, "c3", None).await;

        assert_eq!(registry.connections_of_user("alice").await.len(), 2);
        assert!(registry.connections_of_user("c1").await.is_empty());

        registry.unregister("c1").await.unwrap();
        assert_eq!(registry.connections_of_user("alice").await.len(), 1);
        registry.unregister("c2").await.unwrap();
        assert!(registry.connections_of_user("alice").await.is_empty());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn anonymous_connections_use_their_id_as_peer_id() {
        let registry = ConnectionRegistry::new();
        register(&registry, "c9", None).await;
        let (peer, _) = registry.handle("c9").await.unwrap();
        assert_eq!(peer, "c9");
        assert_eq!(registry.connections_of_user("c9").await.len(), 1);

        registry.unregister("c9").await.unwrap();
        assert!(registry.connections_of_user("c9").await.is_empty());
    }

    #[tokio::test]
    async fn tracks_joined_rooms() {
        let registry = ConnectionRegistry::new();
        register(&registry, "c1", None).await;
        assert!(registry.add_room("c1", Scope::Channel, "general").await);
        assert!(registry.add_room("c1", Scope::Channel, "general").await);
        assert!(registry.add_room("c1", Scope::Call, "general").await);
        assert!(registry.add_room("c1", Scope::Channel, "random").await);
        assert_eq!(registry.rooms_of("c1").await.len(), 3);
        registry.remove_room("c1", Scope::Channel, "general").await;
        assert_eq!(registry.rooms_of("c1").await.len(), 2);
        assert!(!registry.add_room("missing", Scope::Channel, "general").await);
    }
}
