//! Lobby feature: who is in the session, what they may do, and how the host
//! removes someone.

pub mod actions;
pub mod node;
pub mod state;

pub use actions::LobbyActions;
pub use node::{LobbyCommand, LobbyNode};
pub use state::{ChatLine, LobbyMutation, LobbyState, User, UserRole};
