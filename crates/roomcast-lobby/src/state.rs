//! Replicated lobby state.

use chrono::{DateTime, Utc};
use roomcast_rpc::AppState;
use roomcast_types::{DisconnectReason, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Lobby privileges. A user may hold several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Can kick users and grant roles.
    Admin,
    Moderator,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Moderator => write!(f, "moderator"),
        }
    }
}

impl UserRole {
    /// Parse a role name, case-insensitively.
    pub fn from_str_role(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "moderator" | "mod" => Some(UserRole::Moderator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: PeerId,
    pub name: String,
    #[serde(default)]
    pub roles: BTreeSet<UserRole>,
}

impl User {
    pub fn new(id: PeerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.roles.insert(role);
        self
    }
}

/// One line of the lobby's activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatLine {
    pub fn now(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// State transitions applied by the router.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyMutation {
    UserJoined(User),
    UserLeft(PeerId),
    /// Replace the roster wholesale.
    SyncUsers(Vec<User>),
    SetUserRole {
        user_id: PeerId,
        role: UserRole,
        enabled: bool,
    },
    AddChat(ChatLine),
    SetDisconnectReason(DisconnectReason),
}

#[derive(Debug, Clone, Default)]
pub struct LobbyState {
    users: BTreeMap<PeerId, User>,
    chat: Vec<ChatLine>,
    disconnect_reason: Option<DisconnectReason>,
}

impl LobbyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, id: &PeerId) -> Option<&User> {
        self.users.get(id)
    }

    /// Display name, falling back to the raw id for unknown users.
    pub fn user_name(&self, id: &PeerId) -> String {
        self.users
            .get(id)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn has_role(&self, id: &PeerId, role: UserRole) -> bool {
        self.users
            .get(id)
            .is_some_and(|u| u.roles.contains(&role))
    }

    pub fn is_admin(&self, id: &PeerId) -> bool {
        self.has_role(id, UserRole::Admin)
    }

    pub fn chat(&self) -> &[ChatLine] {
        &self.chat
    }

    /// Why the local session ended, if it was ended by the host.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.disconnect_reason
    }
}

impl AppState for LobbyState {
    type Mutation = LobbyMutation;

    fn apply(&mut self, mutation: LobbyMutation) {
        match mutation {
            LobbyMutation::UserJoined(user) => {
                self.users.entry(user.id.clone()).or_insert(user);
            }
            LobbyMutation::UserLeft(id) => {
                self.users.remove(&id);
            }
            LobbyMutation::SyncUsers(users) => {
                self.users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
            }
            LobbyMutation::SetUserRole {
                user_id,
                role,
                enabled,
            } => {
                if let Some(user) = self.users.get_mut(&user_id) {
                    if enabled {
                        user.roles.insert(role);
                    } else {
                        user.roles.remove(&role);
                    }
                }
            }
            LobbyMutation::AddChat(line) => self.chat.push(line),
            LobbyMutation::SetDisconnectReason(reason) => {
                self.disconnect_reason = Some(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        User::new(PeerId::from("a"), "alice")
    }

    #[test]
    fn test_join_does_not_clobber_existing_user() {
        let mut state = LobbyState::new();
        state.apply(LobbyMutation::UserJoined(alice().with_role(UserRole::Admin)));
        state.apply(LobbyMutation::UserJoined(alice()));
        assert_eq!(state.user_count(), 1);
        assert!(state.is_admin(&PeerId::from("a")));
    }

    #[test]
    fn test_role_toggle() {
        let mut state = LobbyState::new();
        let id = PeerId::from("a");
        state.apply(LobbyMutation::UserJoined(alice()));
        state.apply(LobbyMutation::SetUserRole {
            user_id: id.clone(),
            role: UserRole::Moderator,
            enabled: true,
        });
        assert!(state.has_role(&id, UserRole::Moderator));
        assert!(!state.is_admin(&id));
        state.apply(LobbyMutation::SetUserRole {
            user_id: id.clone(),
            role: UserRole::Moderator,
            enabled: false,
        });
        assert!(!state.has_role(&id, UserRole::Moderator));

        // Unknown users are left alone.
        state.apply(LobbyMutation::SetUserRole {
            user_id: PeerId::from("nobody"),
            role: UserRole::Admin,
            enabled: true,
        });
        assert_eq!(state.user_count(), 1);
    }

    #[test]
    fn test_sync_replaces_roster() {
        let mut state = LobbyState::new();
        state.apply(LobbyMutation::UserJoined(alice()));
        state.apply(LobbyMutation::SyncUsers(vec![User::new(PeerId::from("b"), "bob")]));
        assert!(state.user(&PeerId::from("a")).is_none());
        assert_eq!(state.user_name(&PeerId::from("b")), "bob");
        assert_eq!(state.user_name(&PeerId::from("zed")), "zed");
    }

    #[test]
    fn test_leave_and_disconnect_reason() {
        let mut state = LobbyState::new();
        state.apply(LobbyMutation::UserJoined(alice()));
        state.apply(LobbyMutation::UserLeft(PeerId::from("a")));
        state.apply(LobbyMutation::AddChat(ChatLine::now("alice left")));
        state.apply(LobbyMutation::SetDisconnectReason(DisconnectReason::Kicked));
        assert_eq!(state.user_count(), 0);
        assert_eq!(state.chat().len(), 1);
        assert_eq!(state.disconnect_reason(), Some(DisconnectReason::Kicked));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(UserRole::from_str_role("ADMIN"), Some(UserRole::Admin));
        assert_eq!(UserRole::from_str_role("mod"), Some(UserRole::Moderator));
        assert_eq!(UserRole::from_str_role("owner"), None);
        assert_eq!(
            serde_json::to_value(UserRole::Moderator).unwrap(),
            serde_json::json!("moderator")
        );
    }
}
