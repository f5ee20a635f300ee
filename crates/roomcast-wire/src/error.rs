//! Errors from the wire layer.

use roomcast_types::{DisconnectReason, PeerId, Role, RoomcastError};
use thiserror::Error;

/// Errors from the wire protocol and transports.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Refused by host: {0}")]
    Refused(DisconnectReason),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),
    #[error("Operation '{operation}' is not available to a {role}")]
    WrongRole { operation: &'static str, role: Role },
    #[error("Session is closed")]
    SessionClosed,
}

impl From<WireError> for RoomcastError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Io(io) => RoomcastError::Io(io),
            WireError::Json(json) => RoomcastError::Serialization(json.to_string()),
            other => RoomcastError::Network(other.to_string()),
        }
    }
}
