//! Host-authoritative invocation routing.
//!
//! Feature code registers named handlers in an [`InvocationRegistry`], each
//! bound to a [`Realm`] that says who may originate it and who runs it. The
//! [`Router`] owns the replicated state and, for every invocation, decides
//! between local execution, a send to the host, per-recipient sends and a
//! broadcast. Inbound envelopes are decoded, checked against the realm,
//! authorized, validated and executed.
//!
//! Handlers answer with an [`Outcome`]: a mutation to apply, a
//! [`Continuation`] to run later, or a rejection.

pub mod error;
pub mod registry;
pub mod router;
pub mod store;
pub mod task;

pub use error::RpcError;
pub use registry::{
    Args, Call, IntoArgs, Invocation, InvocationDefinition, InvocationOptions, InvocationRegistry,
    InvocationRequest, Realm,
};
pub use router::{Receipt, Router};
pub use store::{AppState, StateReader};
pub use task::{Continuation, Dispatcher, ExecutionContext, Outcome, TaskScope};
