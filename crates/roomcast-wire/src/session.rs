//! The session contract the router depends on.
//!
//! A [`Session`] hides the transport: it knows the local role, the roster
//! and how to get bytes to a peer. Inbound traffic and roster changes are
//! reported as [`SessionEvent`]s on the channel returned when the session
//! is opened.

use crate::error::WireError;
use crate::registry::Connection;
use roomcast_types::{PeerId, Role};

/// Something that happened on a session, delivered in arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A peer completed its handshake.
    PeerConnected(Connection),
    /// A peer sent a message.
    Data { from: PeerId, bytes: Vec<u8> },
    /// A peer's link ended.
    PeerDisconnected(PeerId),
    /// The local session ended; no further events follow.
    Closed,
}

/// Transport-facing half of a session.
///
/// Sends never block: transports queue bytes per link. Sending to a peer
/// that is no longer in the roster yields [`WireError::UnknownPeer`].
pub trait Session: Send + Sync + 'static {
    /// This process's peer id.
    fn local_peer_id(&self) -> PeerId;

    /// Connection record describing this process, used when an invocation
    /// executes locally.
    fn local_connection(&self) -> Connection;

    /// Role fixed when the session was opened.
    fn role(&self) -> Role;

    fn is_host(&self) -> bool {
        self.role() == Role::Host
    }

    /// Look up a live connection.
    fn connection(&self, peer: &PeerId) -> Option<Connection>;

    /// Ids of all remote peers currently connected.
    fn peers(&self) -> Vec<PeerId>;

    /// Send to the host. Client role only.
    fn send_to_host(&self, bytes: Vec<u8>) -> Result<(), WireError>;

    /// Send to every connected client. Host role only.
    fn broadcast(&self, bytes: Vec<u8>) -> Result<(), WireError>;

    /// Send to one peer.
    fn send_to(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), WireError>;

    /// Close one peer's link after its queued messages are flushed.
    fn close_peer(&self, peer: &PeerId);

    /// End the session.
    fn close(&self);
}
