//! Clap CLI definitions for roomcast.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  roomcast host                        Host a lobby on the configured address
  roomcast host --listen 0.0.0.0:27064 Host on every interface
  roomcast join 192.168.1.20:27064     Join a lobby

\x1b[1;36mLobby commands (stdin):\x1b[0m
  /who                 List users and their roles
  /kick <peer>         Ask the host to remove a user (admins only)
  /admin <peer>        Toggle a user's admin role (admins only)
  /mod <peer>          Toggle a user's moderator role (admins only)
  /quit                Leave the lobby";

/// roomcast: host-authoritative lobby sessions.
#[derive(Parser)]
#[command(name = "roomcast", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Host a lobby and wait for peers.
    Host {
        /// Address to listen on (overrides `session.listen_addr`).
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Display name (overrides `session.peer_name`).
        #[arg(long)]
        name: Option<String>,
    },
    /// Join a lobby hosted at ADDR.
    Join {
        /// Host address, e.g. 127.0.0.1:27064.
        addr: SocketAddr,
        /// Display name (overrides `session.peer_name`).
        #[arg(long)]
        name: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_join() {
        let cli = Cli::try_parse_from([
            "roomcast",
            "--config",
            "/tmp/rc.toml",
            "join",
            "10.0.0.2:27064",
            "--name",
            "alice",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/rc.toml")));
        match cli.command {
            Commands::Join { addr, name } => {
                assert_eq!(addr.port(), 27064);
                assert_eq!(name.as_deref(), Some("alice"));
            }
            _ => panic!("expected join"),
        }
    }

    #[test]
    fn test_join_requires_address() {
        assert!(Cli::try_parse_from(["roomcast", "join"]).is_err());
        assert!(Cli::try_parse_from(["roomcast", "join", "not-an-addr"]).is_err());
    }
}
