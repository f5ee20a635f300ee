//! Handler outcomes and continuations.
//!
//! A handler answers synchronously. Work that has to happen later is handed
//! back as a [`Continuation`], which the router polls alongside its other
//! tasks. A continuation never touches the state or the session directly:
//! its [`TaskScope`] queues commands that the router runs in issue order.

use crate::registry::InvocationRequest;
use crate::store::{AppState, StateReader};
use futures::future::BoxFuture;
use futures::FutureExt;
use roomcast_wire::{Connection, Session};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// What a handler produced.
pub enum Outcome<S: AppState> {
    /// Apply this mutation now.
    Applied(S::Mutation),
    /// Schedule this continuation.
    Deferred(Continuation<S>),
    /// Refuse; the reason is logged by the router.
    Rejected(String),
}

impl<S: AppState> Outcome<S> {
    /// Defer to an async continuation.
    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: FnOnce(TaskScope<S>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Outcome::Deferred(Continuation::new(f))
    }

    /// Defer to a continuation that finishes on its first poll.
    pub fn then<F>(f: F) -> Self
    where
        F: FnOnce(&TaskScope<S>) + Send + 'static,
    {
        Outcome::Deferred(Continuation::immediate(f))
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Outcome::Rejected(reason.into())
    }
}

impl<S: AppState> fmt::Debug for Outcome<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied(m) => f.debug_tuple("Applied").field(m).finish(),
            Outcome::Deferred(_) => f.write_str("Deferred(..)"),
            Outcome::Rejected(reason) => f.debug_tuple("Rejected").field(reason).finish(),
        }
    }
}

type TaskBody<S> = Box<dyn FnOnce(TaskScope<S>) -> BoxFuture<'static, ()> + Send>;

/// Deferred work, started by the router once the handler has returned.
pub struct Continuation<S: AppState> {
    body: TaskBody<S>,
}

impl<S: AppState> Continuation<S> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(TaskScope<S>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            body: Box::new(move |scope| f(scope).boxed()),
        }
    }

    pub fn immediate<F>(f: F) -> Self
    where
        F: FnOnce(&TaskScope<S>) + Send + 'static,
    {
        Self::new(move |scope| {
            f(&scope);
            futures::future::ready(())
        })
    }

    pub(crate) fn start(self, scope: TaskScope<S>) -> BoxFuture<'static, ()> {
        (self.body)(scope)
    }
}

/// Work queued for the router.
pub(crate) enum Command<S: AppState> {
    Dispatch(InvocationRequest),
    Apply(S::Mutation),
    Session(Box<dyn FnOnce(&dyn Session) + Send>),
}

/// Queue handle into the router. Everything sent through one dispatcher
/// runs in the order it was sent.
pub struct Dispatcher<S: AppState> {
    commands: mpsc::UnboundedSender<Command<S>>,
}

impl<S: AppState> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<S: AppState> Dispatcher<S> {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command<S>>) -> Self {
        Self { commands }
    }

    /// Route `request` as if it had been dispatched by the local peer.
    pub fn dispatch(&self, request: InvocationRequest) {
        self.send(Command::Dispatch(request));
    }

    /// Apply a mutation to the router's state.
    pub fn apply(&self, mutation: S::Mutation) {
        self.send(Command::Apply(mutation));
    }

    /// Run `f` against the router's session, after everything queued before it.
    pub fn with_session<F>(&self, f: F)
    where
        F: FnOnce(&dyn Session) + Send + 'static,
    {
        self.send(Command::Session(Box::new(f)));
    }

    fn send(&self, command: Command<S>) {
        if self.commands.send(command).is_err() {
            debug!("RPC: router gone, dropping queued command");
        }
    }
}

/// Where and on whose behalf an invocation is running.
#[derive(Clone)]
pub struct ExecutionContext {
    origin: Connection,
    is_host: bool,
    session: Option<Arc<dyn Session>>,
}

impl ExecutionContext {
    pub fn new(origin: Connection, is_host: bool, session: Option<Arc<dyn Session>>) -> Self {
        Self {
            origin,
            is_host,
            session,
        }
    }

    /// The peer that sent the invocation, or the local peer.
    pub fn origin(&self) -> &Connection {
        &self.origin
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        self.session.as_ref()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("origin", &self.origin.id)
            .field("is_host", &self.is_host)
            .field("session", &self.session.is_some())
            .finish()
    }
}

/// What a running continuation can reach.
pub struct TaskScope<S: AppState> {
    dispatcher: Dispatcher<S>,
    state: StateReader<S>,
    context: ExecutionContext,
}

impl<S: AppState> TaskScope<S> {
    pub(crate) fn new(
        dispatcher: Dispatcher<S>,
        state: StateReader<S>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            dispatcher,
            state,
            context,
        }
    }

    pub fn dispatch(&self, request: InvocationRequest) {
        self.dispatcher.dispatch(request);
    }

    pub fn apply(&self, mutation: S::Mutation) {
        self.dispatcher.apply(mutation);
    }

    pub fn with_session<F>(&self, f: F)
    where
        F: FnOnce(&dyn Session) + Send + 'static,
    {
        self.dispatcher.with_session(f);
    }

    pub fn state(&self) -> &StateReader<S> {
        &self.state
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }
}
