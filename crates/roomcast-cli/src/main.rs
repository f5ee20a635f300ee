//! roomcast CLI: host a lobby or join one over TCP.
//!
//! Lobby commands are read from standard input while the session runs.

mod cli;
mod input;

use crate::cli::{Cli, Commands};
use crate::input::{parse_line, roster, Input};
use clap::Parser;
use roomcast_lobby::{LobbyCommand, LobbyNode, LobbyState};
use roomcast_rpc::StateReader;
use roomcast_types::config::load_config;
use roomcast_types::{PeerId, RoomcastConfig, RoomcastResult};
use roomcast_wire::{Session, SessionEvent, TcpSession};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref());
    init_tracing(&config.log_level);

    let host_addr = match cli.command {
        Commands::Host { listen, name } => {
            if let Some(listen) = listen {
                config.session.listen_addr = listen;
            }
            if let Some(name) = name {
                config.session.peer_name = name;
            }
            None
        }
        Commands::Join { addr, name } => {
            if let Some(name) = name {
                config.session.peer_name = name;
            }
            Some(addr)
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async move {
        match host_addr {
            None => host(config).await,
            Some(addr) => join(config, addr).await,
        }
    });

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn host(config: RoomcastConfig) -> RoomcastResult<()> {
    let (session, events) = TcpSession::host(&config.session, PeerId::new()).await?;
    println!(
        "Hosting on {} as {} (id {})",
        session.local_addr(),
        config.session.peer_name,
        session.local_peer_id()
    );
    run_lobby(&config, session, events).await
}

async fn join(config: RoomcastConfig, addr: SocketAddr) -> RoomcastResult<()> {
    let (session, events) = TcpSession::join(&config.session, addr, PeerId::new()).await?;
    println!(
        "Joined {} as {} (id {})",
        addr,
        config.session.peer_name,
        session.local_peer_id()
    );
    run_lobby(&config, session, events).await
}

async fn run_lobby(
    config: &RoomcastConfig,
    session: Arc<TcpSession>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
) -> RoomcastResult<()> {
    let mut node = LobbyNode::new(&config.rpc, session, events)?;
    node.start();

    let (commands, receiver) = mpsc::unbounded_channel();
    let stdin = tokio::spawn(read_stdin(node.state(), commands));
    node.run(receiver).await;
    stdin.abort();

    if let Some(reason) = node.state().read(|s| s.disconnect_reason()) {
        println!("Disconnected: {}", reason.message());
    }
    Ok(())
}

async fn read_stdin(state: StateReader<LobbyState>, commands: mpsc::UnboundedSender<LobbyCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_line(&line) {
            Input::Lobby(command) => {
                let leaving = command == LobbyCommand::Leave;
                if commands.send(command).is_err() || leaving {
                    break;
                }
            }
            Input::Who => {
                for line in state.read(roster) {
                    println!("  {line}");
                }
            }
            Input::Empty => {}
            Input::Unknown(message) => eprintln!("{message}"),
        }
    }
}
