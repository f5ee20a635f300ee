//! Parsing of lobby commands typed on standard input.

use roomcast_lobby::{LobbyCommand, LobbyState, UserRole};
use roomcast_types::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Lobby(LobbyCommand),
    Who,
    Empty,
    Unknown(String),
}

pub fn parse_line(line: &str) -> Input {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Input::Empty;
    };
    let target = words.next().map(PeerId::from);

    match (head, target) {
        ("/who", _) => Input::Who,
        ("/quit" | "/leave", _) => Input::Lobby(LobbyCommand::Leave),
        ("/kick", Some(peer)) => Input::Lobby(LobbyCommand::Kick(peer)),
        ("/admin", Some(peer)) => Input::Lobby(LobbyCommand::ToggleRole(peer, UserRole::Admin)),
        ("/mod", Some(peer)) => Input::Lobby(LobbyCommand::ToggleRole(peer, UserRole::Moderator)),
        ("/kick" | "/admin" | "/mod", None) => Input::Unknown(format!("{head} needs a peer id")),
        _ => Input::Unknown(format!("unknown command '{head}'")),
    }
}

/// One line per user: id, name and roles.
pub fn roster(state: &LobbyState) -> Vec<String> {
    state
        .users()
        .map(|user| {
            let roles: Vec<String> = user.roles.iter().map(|r| r.to_string()).collect();
            if roles.is_empty() {
                format!("{}  {}", user.id, user.name)
            } else {
                format!("{}  {}  [{}]", user.id, user.name, roles.join(", "))
            }
        })
        .collect()
}
