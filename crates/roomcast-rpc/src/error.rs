//! Invocation and routing errors.

use roomcast_types::RoomcastError;
use roomcast_wire::WireError;
use thiserror::Error;

/// Errors raised while registering, routing or executing invocations.
///
/// `Registration`, `Authority`, `UnknownInvocation` on dispatch,
/// `MissingRecipients` and `NotConnected` are programming errors returned to
/// the caller. Everything raised while handling inbound bytes is contained
/// by the router and only logged.
#[derive(Debug, Error)]
pub enum RpcError {
    /// A handler could not be registered.
    #[error("Registration error: {0}")]
    Registration(String),

    /// A client tried to originate a client-realm invocation.
    #[error("Client invocation '{0}' can only be dispatched by the host")]
    Authority(String),

    /// No definition is registered under this name.
    #[error("Unknown invocation '{0}'")]
    UnknownInvocation(String),

    /// A client-realm request was built without a recipient list.
    #[error("Client invocation '{0}' requires a recipient list")]
    MissingRecipients(String),

    /// The invocation needs a session and none is connected.
    #[error("Invocation '{0}' requires a connected session")]
    NotConnected(String),

    /// A handler could not interpret its arguments.
    #[error("Invalid arguments for '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    /// A tagged envelope carried a malformed body.
    #[error("Malformed envelope: {0}")]
    Decode(String),

    /// An invocation arrived in a direction its realm forbids.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The session refused a send.
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl From<RpcError> for RoomcastError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Wire(wire) => wire.into(),
            RpcError::Registration(msg) => RoomcastError::Config(msg),
            other => RoomcastError::InvalidInput(other.to_string()),
        }
    }
}
