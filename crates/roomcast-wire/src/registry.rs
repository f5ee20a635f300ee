//! Session registry: the roster of live connections.
//!
//! The [`SessionRegistry`] is shared between a session's transport tasks,
//! which add and remove peers as links come and go, and the router, which
//! resolves peer ids while routing. A peer can vanish between a lookup and
//! a send; callers treat that as a missed delivery, not a failure.

use chrono::{DateTime, Utc};
use roomcast_types::PeerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

/// One peer link as seen by the local process.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    /// The remote (or local) peer's id.
    pub id: PeerId,
    /// Display name from the handshake.
    pub name: String,
    /// Remote socket address, if the transport has one.
    pub address: Option<SocketAddr>,
    /// Whether the peer proved knowledge of the session secret.
    pub authenticated: bool,
    /// When the link was established.
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(id: PeerId, name: impl Into<String>, authenticated: bool) -> Self {
        Self {
            id,
            name: name.into(),
            address: None,
            authenticated,
            connected_at: Utc::now(),
        }
    }

    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }
}

/// Thread-safe roster of connections.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    connections: Arc<RwLock<HashMap<PeerId, Connection>>>,
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register or replace a connection.
    pub fn add(&self, connection: Connection) {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        connections.insert(connection.id.clone(), connection);
    }

    /// Remove a connection.
    pub fn remove(&self, id: &PeerId) -> Option<Connection> {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        connections.remove(id)
    }

    /// Get a snapshot of a specific connection.
    pub fn get(&self, id: &PeerId) -> Option<Connection> {
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        connections.get(id).cloned()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        connections.contains_key(id)
    }

    /// Ids of all connected peers, sorted for stable iteration.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<PeerId> = connections.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str, authenticated: bool) -> Connection {
        Connection::new(PeerId::from(id), format!("{id}-name"), authenticated)
    }

    #[test]
    fn test_add_and_get() {
        let registry = SessionRegistry::new();
        registry.add(conn("p1", true));

        let retrieved = registry.get(&PeerId::from("p1")).unwrap();
        assert_eq!(retrieved.name, "p1-name");
        assert!(retrieved.authenticated);
        assert!(registry.contains(&PeerId::from("p1")));
        assert!(registry.get(&PeerId::from("p2")).is_none());
    }

    #[test]
    fn test_remove() {
        let registry = SessionRegistry::new();
        registry.add(conn("p1", true));
        assert!(registry.contains(&PeerId::from("p1")));

        assert!(registry.remove(&PeerId::from("p1")).is_some());
        assert!(registry.remove(&PeerId::from("p1")).is_none());
        assert!(registry.peer_ids().is_empty());
    }

    #[test]
    fn test_peer_ids_sorted() {
        let registry = SessionRegistry::new();
        registry.add(conn("c", true));
        registry.add(conn("a", true));
        registry.add(conn("b", true));
        let ids: Vec<String> = registry
            .peer_ids()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
