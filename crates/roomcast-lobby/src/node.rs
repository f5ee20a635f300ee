//! The lobby event loop: session events in, roster upkeep and user
//! commands out.

use crate::actions::LobbyActions;
use crate::state::{LobbyMutation, LobbyState, User, UserRole};
use roomcast_rpc::{InvocationRegistry, Router, RpcError, StateReader};
use roomcast_types::{PeerId, RpcConfig};
use roomcast_wire::{Session, SessionEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Something the local user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyCommand {
    Kick(PeerId),
    ToggleRole(PeerId, UserRole),
    Leave,
}

enum Step {
    Event(Option<SessionEvent>),
    Command(Option<LobbyCommand>),
    Progress,
}

pub struct LobbyNode {
    router: Router<LobbyState>,
    actions: LobbyActions,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    open: bool,
}

impl LobbyNode {
    /// Build the registry, the router and attach `session`.
    pub fn new(
        config: &RpcConfig,
        session: Arc<dyn Session>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Result<Self, RpcError> {
        let mut registry = InvocationRegistry::from_config(config);
        let actions = LobbyActions::register(&mut registry)?;
        let mut router = Router::new(Arc::new(registry), LobbyState::new());
        router.connect(session);
        Ok(Self {
            router,
            actions,
            events,
            open: true,
        })
    }

    /// Seed the roster. The host lists itself as the lobby's admin.
    pub fn start(&mut self) {
        let Some(session) = self.router.session().cloned() else {
            return;
        };
        if session.is_host() {
            let local = session.local_connection();
            info!(peer = %local.id, name = %local.name, "Lobby: hosting");
            self.router
                .dispatcher()
                .apply(LobbyMutation::UserJoined(
                    User::new(local.id, local.name).with_role(UserRole::Admin),
                ));
            self.router.settle();
        }
    }

    pub fn state(&self) -> StateReader<LobbyState> {
        self.router.state()
    }

    pub fn router(&self) -> &Router<LobbyState> {
        &self.router
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// React to one session event. Returns whether the session is still open.
    pub fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::PeerConnected(connection) => {
                if self.router.is_host() {
                    self.welcome(connection.id, connection.name);
                } else {
                    info!(host = %connection.id, "Lobby: joined");
                }
            }
            SessionEvent::Data { from, bytes } => {
                let receipt = self.router.receive(&from, &bytes);
                debug!(peer = %from, ?receipt, "Lobby: message handled");
            }
            SessionEvent::PeerDisconnected(id) => {
                if self.router.is_host() {
                    self.farewell(id);
                } else {
                    info!(host = %id, "Lobby: link to host lost");
                }
            }
            SessionEvent::Closed => {
                let reason = self.router.state().read(|s| s.disconnect_reason());
                match reason {
                    Some(reason) => info!(reason = %reason, "Lobby: session closed"),
                    None => info!("Lobby: session closed"),
                }
                self.router.disconnect();
                self.open = false;
            }
        }
        self.open
    }

    /// Handle every event already queued. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while self.open {
            let Ok(event) = self.events.try_recv() else {
                break;
            };
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    pub fn handle_command(&mut self, command: LobbyCommand) -> Result<(), RpcError> {
        match command {
            LobbyCommand::Kick(target) => {
                let request = self.actions.kick_user.call((target,))?;
                self.router.dispatch(request)
            }
            LobbyCommand::ToggleRole(target, role) => {
                let request = self.actions.toggle_user_role.call((target, role))?;
                self.router.dispatch(request)
            }
            LobbyCommand::Leave => {
                if let Some(session) = self.router.session() {
                    session.close();
                }
                Ok(())
            }
        }
    }

    /// Drive the lobby until the session closes.
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<LobbyCommand>) {
        let mut commands_open = true;
        while self.open {
            let step = tokio::select! {
                event = self.events.recv() => Step::Event(event),
                command = commands.recv(), if commands_open => Step::Command(command),
                () = self.router.progress() => Step::Progress,
            };
            match step {
                Step::Event(Some(event)) => {
                    self.handle_event(event);
                }
                Step::Event(None) => self.open = false,
                Step::Command(Some(command)) => {
                    if let Err(e) = self.handle_command(command) {
                        warn!(error = %e, "Lobby: command failed");
                    }
                }
                Step::Command(None) => {
                    commands_open = false;
                    if let Err(e) = self.handle_command(LobbyCommand::Leave) {
                        warn!(error = %e, "Lobby: leave failed");
                    }
                }
                Step::Progress => {}
            }
        }
    }

    /// Host side: announce a new peer and send it the roster.
    fn welcome(&mut self, id: PeerId, name: String) {
        let announce = match self.actions.user_joined.call((id.clone(), name)) {
            Ok(request) => request,
            Err(e) => {
                warn!(peer = %id, error = %e, "Lobby: could not build join notice");
                return;
            }
        };
        if let Err(e) = self.router.dispatch(announce) {
            warn!(peer = %id, error = %e, "Lobby: join notice failed");
        }

        let users: Vec<User> = self.router.state().read(|s| s.users().cloned().collect());
        let sync = self
            .actions
            .sync_users
            .call((users,))
            .map(|request| request.to([id.clone()]));
        match sync.and_then(|request| self.router.dispatch(request)) {
            Ok(()) => debug!(peer = %id, "Lobby: roster sent"),
            Err(e) => warn!(peer = %id, error = %e, "Lobby: roster sync failed"),
        }
    }

    /// Host side: announce a departed peer.
    fn farewell(&mut self, id: PeerId) {
        if self.router.state().read(|s| s.user(&id).is_none()) {
            return;
        }
        let result = self
            .actions
            .user_left
            .call((id.clone(),))
            .and_then(|request| self.router.dispatch(request));
        if let Err(e) = result {
            warn!(peer = %id, error = %e, "Lobby: leave notice failed");
        }
    }
}
