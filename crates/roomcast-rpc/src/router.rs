//! The router: decides who executes an invocation and who receives it.
//!
//! Outbound routing depends on the invocation's realm and the local role:
//!
//! | Realm     | host                         | client               | no session          |
//! |-----------|------------------------------|----------------------|---------------------|
//! | Server    | execute locally              | send to host         | `NotConnected`      |
//! | Client    | send to each recipient       | `Authority`          | `Authority`         |
//! | Multicast | broadcast, execute locally   | execute locally      | execute locally     |
//!
//! Inbound bytes go through decode, lookup, realm check, authorization,
//! validation and execution. Failures there never reach the caller of
//! [`Router::receive`]; they come back as a [`Receipt`] and are logged.

use crate::error::RpcError;
use crate::registry::{Args, Call, InvocationDefinition, InvocationRegistry, InvocationRequest, Realm};
use crate::store::{AppState, StateReader, StateStore};
use crate::task::{Command, Dispatcher, ExecutionContext, Outcome, TaskScope};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use roomcast_types::{PeerId, Role};
use roomcast_wire::{decode_invocation, encode_invocation, Connection, Session, WireError};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What happened to one inbound message.
#[derive(Debug)]
pub enum Receipt {
    /// Not an invocation envelope.
    Ignored,
    /// The handler ran.
    Executed,
    /// Authorization, validation or the handler itself refused.
    Rejected(String),
    /// The message could not be routed to a handler.
    Dropped(RpcError),
}

impl Receipt {
    pub fn is_executed(&self) -> bool {
        matches!(self, Receipt::Executed)
    }
}

/// Routes invocations for one process and owns its replicated state.
pub struct Router<S: AppState> {
    registry: Arc<InvocationRegistry<S>>,
    store: StateStore<S>,
    session: Option<Arc<dyn Session>>,
    commands_tx: mpsc::UnboundedSender<Command<S>>,
    commands_rx: mpsc::UnboundedReceiver<Command<S>>,
    tasks: FuturesUnordered<BoxFuture<'static, ()>>,
}

impl<S: AppState> Router<S> {
    pub fn new(registry: Arc<InvocationRegistry<S>>, state: S) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            store: StateStore::new(state),
            session: None,
            commands_tx,
            commands_rx,
            tasks: FuturesUnordered::new(),
        }
    }

    /// Attach a session; its role decides routing from now on.
    pub fn connect(&mut self, session: Arc<dyn Session>) {
        debug!(
            peer = %session.local_peer_id(),
            role = %session.role(),
            "RPC: router connected"
        );
        self.session = Some(session);
    }

    /// Detach the session and drop all pending continuations and commands.
    pub fn disconnect(&mut self) {
        if self.session.take().is_some() {
            debug!("RPC: router disconnected");
        }
        self.tasks = FuturesUnordered::new();
        while self.commands_rx.try_recv().is_ok() {}
    }

    pub fn role(&self) -> Option<Role> {
        self.session.as_ref().map(|s| s.role())
    }

    pub fn is_host(&self) -> bool {
        self.role() == Some(Role::Host)
    }

    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        self.session.as_ref()
    }

    pub fn state(&self) -> StateReader<S> {
        self.store.reader()
    }

    /// A queue handle for code running outside a handler.
    pub fn dispatcher(&self) -> Dispatcher<S> {
        Dispatcher::new(self.commands_tx.clone())
    }

    /// Continuations that have not finished yet.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Route a locally built request, then run whatever became ready.
    pub fn dispatch(&mut self, request: InvocationRequest) -> Result<(), RpcError> {
        let result = self.route(request);
        self.settle();
        result
    }

    /// Handle bytes that arrived from `from`, then run whatever became ready.
    pub fn receive(&mut self, from: &PeerId, bytes: &[u8]) -> Receipt {
        let receipt = self.accept(from, bytes);
        self.settle();
        receipt
    }

    /// Run queued commands and poll continuations until nothing is ready.
    pub fn settle(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(command) = self.commands_rx.try_recv() {
                self.run_command(command);
                progressed = true;
            }
            while !self.tasks.is_empty() {
                match self.tasks.next().now_or_never() {
                    Some(Some(())) => progressed = true,
                    _ => break,
                }
            }
            if !progressed {
                break;
            }
        }
    }

    /// Wait until a command arrives or a continuation finishes, then settle.
    ///
    /// Never resolves while there is nothing to wait for.
    pub async fn progress(&mut self) {
        let command = tokio::select! {
            Some(command) = self.commands_rx.recv() => Some(command),
            Some(()) = self.tasks.next(), if !self.tasks.is_empty() => None,
        };
        if let Some(command) = command {
            self.run_command(command);
        }
        self.settle();
    }

    fn route(&mut self, request: InvocationRequest) -> Result<(), RpcError> {
        let registry = Arc::clone(&self.registry);
        let name = request.message.name.clone();
        let definition = registry
            .lookup(&name)
            .ok_or_else(|| RpcError::UnknownInvocation(name.clone()))?;
        let session = self.session.clone();

        match definition.realm {
            Realm::Server => match session {
                None => Err(RpcError::NotConnected(name)),
                Some(session) if session.is_host() => {
                    self.execute_local(definition, request.message.args);
                    Ok(())
                }
                Some(session) => {
                    let bytes = encode_invocation(&request.message)?;
                    session.send_to_host(bytes)?;
                    debug!(invocation = %name, "RPC: sent to host");
                    Ok(())
                }
            },
            Realm::Client => {
                let session = match session {
                    Some(session) if session.is_host() => session,
                    _ => return Err(RpcError::Authority(name)),
                };
                let recipients = request
                    .recipients
                    .ok_or_else(|| RpcError::MissingRecipients(name.clone()))?;
                let local = session.local_peer_id();
                let bytes = encode_invocation(&request.message)?;

                for recipient in recipients {
                    if recipient == local {
                        self.execute_local(definition, request.message.args.clone());
                        continue;
                    }
                    match session.send_to(&recipient, bytes.clone()) {
                        Ok(()) => {
                            debug!(invocation = %name, peer = %recipient, "RPC: sent to client")
                        }
                        Err(WireError::UnknownPeer(_)) => {
                            debug!(invocation = %name, peer = %recipient, "RPC: recipient gone, skipping")
                        }
                        Err(e) => {
                            warn!(invocation = %name, peer = %recipient, error = %e, "RPC: send to client failed")
                        }
                    }
                }
                Ok(())
            }
            Realm::Multicast => {
                if let Some(session) = session.filter(|s| s.is_host()) {
                    let bytes = encode_invocation(&request.message)?;
                    session.broadcast(bytes)?;
                    debug!(invocation = %name, "RPC: broadcast");
                }
                self.execute_local(definition, request.message.args);
                Ok(())
            }
        }
    }

    fn execute_local(&mut self, definition: &InvocationDefinition<S>, args: Vec<Value>) {
        let origin = match &self.session {
            Some(session) => session.local_connection(),
            None => Connection::new(PeerId::from("local"), "local", true),
        };
        self.execute(definition, args, origin);
    }

    fn accept(&mut self, from: &PeerId, bytes: &[u8]) -> Receipt {
        let message = match decode_invocation(bytes) {
            Ok(Some(message)) => message,
            Ok(None) => return Receipt::Ignored,
            Err(e) => {
                warn!(peer = %from, error = %e, "RPC: malformed envelope dropped");
                return Receipt::Dropped(RpcError::Decode(e.to_string()));
            }
        };

        let registry = Arc::clone(&self.registry);
        let Some(definition) = registry.lookup(&message.name) else {
            warn!(peer = %from, invocation = %message.name, "RPC: unknown invocation dropped");
            return Receipt::Dropped(RpcError::UnknownInvocation(message.name));
        };

        let Some(session) = self.session.clone() else {
            warn!(peer = %from, invocation = %message.name, "RPC: received without a session");
            return Receipt::Dropped(RpcError::NotConnected(message.name));
        };

        if let Err(e) = check_realm(definition.realm, session.role(), &message.name) {
            warn!(peer = %from, error = %e, "RPC: dropped");
            return Receipt::Dropped(e);
        }

        let origin = session
            .connection(from)
            .unwrap_or_else(|| Connection::new(from.clone(), from.as_str(), false));
        self.execute(definition, message.args, origin)
    }

    fn execute(
        &mut self,
        definition: &InvocationDefinition<S>,
        args: Vec<Value>,
        origin: Connection,
    ) -> Receipt {
        if let Err(reason) = definition.authorize(&origin) {
            warn!(peer = %origin.id, invocation = %definition.name, "RPC: {reason}");
            return Receipt::Rejected(reason);
        }
        if let Err(reason) = definition.check_args(&args) {
            warn!(peer = %origin.id, invocation = %definition.name, "RPC: {reason}");
            return Receipt::Rejected(reason);
        }

        let args = Args::new(definition.name.clone(), args);
        let is_host = self.is_host();
        let context = ExecutionContext::new(origin, is_host, self.session.clone());
        let state = self.store.reader();
        let outcome = (definition.handler)(Call {
            args: &args,
            context: &context,
            state: &state,
        });

        match outcome {
            Ok(Outcome::Applied(mutation)) => {
                self.store.apply(mutation);
                Receipt::Executed
            }
            Ok(Outcome::Deferred(continuation)) => {
                let scope = TaskScope::new(self.dispatcher(), state, context);
                self.tasks.push(continuation.start(scope));
                Receipt::Executed
            }
            Ok(Outcome::Rejected(reason)) => {
                warn!(
                    peer = %context.origin().id,
                    invocation = %definition.name,
                    reason = %reason,
                    "RPC: handler rejected invocation"
                );
                Receipt::Rejected(reason)
            }
            Err(e) => {
                warn!(
                    peer = %context.origin().id,
                    invocation = %definition.name,
                    error = %e,
                    "RPC: handler failed"
                );
                Receipt::Dropped(e)
            }
        }
    }

    fn run_command(&mut self, command: Command<S>) {
        match command {
            Command::Dispatch(request) => {
                let name = request.message.name.clone();
                if let Err(e) = self.route(request) {
                    warn!(invocation = %name, error = %e, "RPC: queued dispatch failed");
                }
            }
            Command::Apply(mutation) => self.store.apply(mutation),
            Command::Session(f) => match &self.session {
                Some(session) => f(session.as_ref()),
                None => debug!("RPC: no session for queued session command"),
            },
        }
    }
}

/// Reject invocations arriving in a direction their realm never sends.
fn check_realm(realm: Realm, role: Role, name: &str) -> Result<(), RpcError> {
    let violation = match (realm, role) {
        (Realm::Server, Role::Client) => Some("server invocation received by a client"),
        (Realm::Client, Role::Host) => Some("client invocation received by the host"),
        (Realm::Multicast, Role::Host) => Some("multicast invocation received by the host"),
        _ => None,
    };
    match violation {
        Some(what) => Err(RpcError::ProtocolViolation(format!("{what}: '{name}'"))),
        None => Ok(()),
    }
}
