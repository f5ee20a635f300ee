//! Peer identity and session roles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a peer within a session.
///
/// Peers pick their own id when joining (a random UUID by default); the host
/// refuses a second connection claiming an id already in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a new random PeerId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The part a process plays in a session. Exactly one per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The authoritative process every client connects to.
    Host,
    /// A process connected to the host.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => write!(f, "host"),
            Role::Client => write!(f, "client"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_unique() {
        assert_ne!(PeerId::new(), PeerId::new());
    }

    #[test]
    fn test_peer_id_serializes_as_string() {
        let id = PeerId::from("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        let back: PeerId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Host.to_string(), "host");
        assert_eq!(Role::Client.to_string(), "client");
    }
}
