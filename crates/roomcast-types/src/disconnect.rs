//! Reasons a peer leaves a session.
//!
//! Reasons travel on the wire as small integers and are only used for
//! reporting; nothing branches on them besides display code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a connection was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DisconnectReason {
    /// The host closed the session.
    HostDisconnect = 1,
    /// The peer stopped responding.
    Timeout = 2,
    /// The handshake carried unusable peer information.
    InvalidClientInfo = 3,
    /// Protocol versions differ.
    VersionMismatch = 4,
    /// Another peer already holds the same credential or id.
    DuplicateCredential = 5,
    /// The session has no free slots.
    SessionFull = 6,
    /// An admin removed the peer.
    Kicked = 7,
}

impl DisconnectReason {
    /// Numeric wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::HostDisconnect),
            2 => Some(Self::Timeout),
            3 => Some(Self::InvalidClientInfo),
            4 => Some(Self::VersionMismatch),
            5 => Some(Self::DuplicateCredential),
            6 => Some(Self::SessionFull),
            7 => Some(Self::Kicked),
            _ => None,
        }
    }

    /// Human-readable message for this reason.
    pub fn message(self) -> &'static str {
        match self {
            Self::HostDisconnect => "Host closed connection",
            Self::Timeout => "Network timeout",
            Self::InvalidClientInfo => "Invalid client info",
            Self::VersionMismatch => "Client version mismatch",
            Self::DuplicateCredential => "Shared credential found in session",
            Self::SessionFull => "Session is full",
            Self::Kicked => "Kicked from session",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl From<DisconnectReason> for u8 {
    fn from(reason: DisconnectReason) -> u8 {
        reason.code()
    }
}

impl TryFrom<u8> for DisconnectReason {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown disconnect reason code {code}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for code in 1..=7u8 {
            let reason = DisconnectReason::from_code(code).unwrap();
            assert_eq!(reason.code(), code);
        }
        assert!(DisconnectReason::from_code(0).is_none());
        assert!(DisconnectReason::from_code(8).is_none());
    }

    #[test]
    fn test_serializes_as_number() {
        let json = serde_json::to_string(&DisconnectReason::Kicked).unwrap();
        assert_eq!(json, "7");
        let back: DisconnectReason = serde_json::from_str("6").unwrap();
        assert_eq!(back, DisconnectReason::SessionFull);
        assert!(serde_json::from_str::<DisconnectReason>("42").is_err());
    }

    #[test]
    fn test_display_uses_message() {
        assert_eq!(DisconnectReason::SessionFull.to_string(), "Session is full");
    }
}
