//! Wire message types.
//!
//! Invocations travel as `RPC` followed by the UTF-8 JSON of
//! `{"name": ..., "args": [...]}`. Message boundaries come from the
//! transport; the envelope itself carries no length.
//!
//! The TCP transport wraps every message in a 4-byte big-endian length
//! header and opens each link with a JSON [`Handshake`] exchange.

use crate::error::WireError;
use roomcast_types::{DisconnectReason, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Prefix identifying an invocation envelope.
pub const RPC_TAG: &[u8] = b"RPC";

/// Current handshake protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum single frame size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// A named invocation with positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationMessage {
    /// Registered invocation name.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl InvocationMessage {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Encode an invocation as `RPC` + JSON.
pub fn encode_invocation(msg: &InvocationMessage) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_vec(msg)?;
    let mut bytes = Vec::with_capacity(RPC_TAG.len() + json.len());
    bytes.extend_from_slice(RPC_TAG);
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode an invocation envelope.
///
/// Returns `Ok(None)` when the bytes do not start with [`RPC_TAG`]; such
/// messages belong to some other consumer. A tagged message with a malformed
/// body is an error.
pub fn decode_invocation(bytes: &[u8]) -> Result<Option<InvocationMessage>, WireError> {
    match bytes.strip_prefix(RPC_TAG) {
        Some(body) => Ok(Some(serde_json::from_slice(body)?)),
        None => Ok(None),
    }
}

/// Link-opening messages exchanged by the TCP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Handshake {
    /// First frame sent by a joining client.
    Hello {
        peer_id: PeerId,
        peer_name: String,
        protocol_version: u32,
        /// Random nonce for HMAC authentication.
        #[serde(default)]
        nonce: String,
        /// HMAC-SHA256(shared_secret, nonce + peer_id).
        #[serde(default)]
        auth_hmac: String,
    },
    /// Host acceptance, carrying the host's own identity and proof.
    Welcome {
        peer_id: PeerId,
        peer_name: String,
        protocol_version: u32,
        #[serde(default)]
        nonce: String,
        #[serde(default)]
        auth_hmac: String,
    },
    /// Host refusal; the link is closed right after.
    Refused {
        reason: DisconnectReason,
        message: String,
    },
}

/// Encode a handshake message as a JSON frame body.
pub fn encode_handshake(msg: &Handshake) -> Result<Vec<u8>, WireError> {
    Ok(serde_json::to_vec(msg)?)
}

/// Parse a frame body into a handshake message.
pub fn decode_handshake(body: &[u8]) -> Result<Handshake, WireError> {
    Ok(serde_json::from_slice(body)?)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Write a framed message (4-byte length + body).
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).map_err(|_| WireError::MessageTooLarge {
        size: u32::MAX,
        max: MAX_FRAME_SIZE,
    })?;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message (4-byte length + body).
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > MAX_FRAME_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}
