//! In-process transport with the [`Session`] contract.
//!
//! A [`MemoryNetwork`] is a hub: one host and any number of clients exchange
//! bytes through unbounded channels, and every delivery is recorded so tests
//! can assert on exactly what went over the "wire".

use crate::error::WireError;
use crate::registry::{Connection, SessionRegistry};
use crate::session::{Session, SessionEvent};
use roomcast_types::{PeerId, Role};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// One recorded send.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub from: PeerId,
    pub to: PeerId,
    pub bytes: Vec<u8>,
}

struct Endpoint {
    session: Arc<MemorySession>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

#[derive(Default)]
struct Hub {
    endpoints: Mutex<HashMap<PeerId, Endpoint>>,
    host: Mutex<Option<PeerId>>,
    log: Mutex<Vec<Delivery>>,
}

impl Hub {
    fn endpoint_events(&self, peer: &PeerId) -> Option<mpsc::UnboundedSender<SessionEvent>> {
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        endpoints.get(peer).map(|e| e.events.clone())
    }

    fn endpoint_session(&self, peer: &PeerId) -> Option<Arc<MemorySession>> {
        let endpoints = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        endpoints.get(peer).map(|e| Arc::clone(&e.session))
    }

    fn deliver(&self, from: &PeerId, to: &PeerId, bytes: Vec<u8>) -> Result<(), WireError> {
        let events = self
            .endpoint_events(to)
            .ok_or_else(|| WireError::UnknownPeer(to.clone()))?;
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Delivery {
                from: from.clone(),
                to: to.clone(),
                bytes: bytes.clone(),
            });
        events
            .send(SessionEvent::Data {
                from: from.clone(),
                bytes,
            })
            .map_err(|_| WireError::UnknownPeer(to.clone()))
    }

    /// Unlink `client` from the host on both sides.
    fn sever(&self, host: &PeerId, client: &PeerId) {
        let host_session = self.endpoint_session(host);
        let client_session = self.endpoint_session(client);

        if let Some(host_session) = host_session {
            if host_session.registry.remove(client).is_some() {
                host_session.emit(SessionEvent::PeerDisconnected(client.clone()));
            }
        }
        if let Some(client_session) = client_session {
            if client_session.registry.remove(host).is_some() {
                client_session.emit(SessionEvent::PeerDisconnected(host.clone()));
            }
            client_session.shut();
        }
        self.endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(client);
    }
}

/// An in-process session network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Hub>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the host session. A network has at most one host.
    pub fn host(
        &self,
        id: impl Into<PeerId>,
        name: &str,
    ) -> Result<(Arc<MemorySession>, mpsc::UnboundedReceiver<SessionEvent>), WireError> {
        let id = id.into();
        let mut host = self.hub.host.lock().unwrap_or_else(|e| e.into_inner());
        if host.is_some() {
            return Err(WireError::HandshakeFailed(
                "network already has a host".to_string(),
            ));
        }
        *host = Some(id.clone());
        drop(host);

        let (session, receiver) = self.open(Connection::new(id, name, true), Role::Host);
        Ok((session, receiver))
    }

    /// Join the host as a client. `authenticated` is how the host will see
    /// this peer.
    pub fn join(
        &self,
        id: impl Into<PeerId>,
        name: &str,
        authenticated: bool,
    ) -> Result<(Arc<MemorySession>, mpsc::UnboundedReceiver<SessionEvent>), WireError> {
        let host_id = self
            .hub
            .host
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(WireError::SessionClosed)?;
        let host = self
            .hub
            .endpoint_session(&host_id)
            .ok_or(WireError::SessionClosed)?;

        let id = id.into();
        if id == host_id || host.registry.contains(&id) {
            return Err(WireError::Refused(
                roomcast_types::DisconnectReason::DuplicateCredential,
            ));
        }

        let local = Connection::new(id, name, true);
        let (session, receiver) = self.open(local.clone(), Role::Client);

        let seen_by_host = Connection {
            authenticated,
            ..local
        };
        host.registry.add(seen_by_host.clone());
        host.emit(SessionEvent::PeerConnected(seen_by_host));

        let host_conn = host.local_connection();
        session.registry.add(host_conn.clone());
        session.emit(SessionEvent::PeerConnected(host_conn));

        Ok((session, receiver))
    }

    /// Every delivery made so far, in order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.hub
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Deliveries addressed to `peer`.
    pub fn deliveries_to(&self, peer: &PeerId) -> Vec<Delivery> {
        self.deliveries()
            .into_iter()
            .filter(|d| &d.to == peer)
            .collect()
    }

    pub fn clear_deliveries(&self) {
        self.hub
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn open(
        &self,
        local: Connection,
        role: Role,
    ) -> (Arc<MemorySession>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let session = Arc::new(MemorySession {
            hub: Arc::clone(&self.hub),
            local: local.clone(),
            role,
            registry: SessionRegistry::new(),
            events: events.clone(),
            closed: AtomicBool::new(false),
        });
        self.hub
            .endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                local.id,
                Endpoint {
                    session: Arc::clone(&session),
                    events,
                },
            );
        (session, receiver)
    }
}

/// One peer's view of a [`MemoryNetwork`].
pub struct MemorySession {
    hub: Arc<Hub>,
    local: Connection,
    role: Role,
    registry: SessionRegistry,
    events: mpsc::UnboundedSender<SessionEvent>,
    closed: AtomicBool,
}

impl MemorySession {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drop a peer from this side's roster only, as if its link died
    /// without the hub noticing yet.
    pub fn forget_peer(&self, peer: &PeerId) {
        self.registry.remove(peer);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn shut(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(SessionEvent::Closed);
        }
    }

    fn host_id(&self) -> Option<PeerId> {
        self.hub
            .host
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Session for MemorySession {
    fn local_peer_id(&self) -> PeerId {
        self.local.id.clone()
    }

    fn local_connection(&self) -> Connection {
        self.local.clone()
    }

    fn role(&self) -> Role {
        self.role
    }

    fn connection(&self, peer: &PeerId) -> Option<Connection> {
        self.registry.get(peer)
    }

    fn peers(&self) -> Vec<PeerId> {
        self.registry.peer_ids()
    }

    fn send_to_host(&self, bytes: Vec<u8>) -> Result<(), WireError> {
        if self.role != Role::Client {
            return Err(WireError::WrongRole {
                operation: "send_to_host",
                role: self.role,
            });
        }
        let host = self.host_id().ok_or(WireError::SessionClosed)?;
        self.send_to(&host, bytes)
    }

    fn broadcast(&self, bytes: Vec<u8>) -> Result<(), WireError> {
        if self.role != Role::Host {
            return Err(WireError::WrongRole {
                operation: "broadcast",
                role: self.role,
            });
        }
        for peer in self.peers() {
            if let Err(e) = self.send_to(&peer, bytes.clone()) {
                debug!(peer = %peer, error = %e, "Memory: broadcast skipped peer");
            }
        }
        Ok(())
    }

    fn send_to(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), WireError> {
        if self.is_closed() {
            return Err(WireError::SessionClosed);
        }
        if !self.registry.contains(peer) {
            return Err(WireError::UnknownPeer(peer.clone()));
        }
        self.hub.deliver(&self.local.id, peer, bytes)
    }

    fn close_peer(&self, peer: &PeerId) {
        match self.role {
            Role::Host => self.hub.sever(&self.local.id, peer),
            Role::Client => self.close(),
        }
    }

    fn close(&self) {
        match self.role {
            Role::Host => {
                for peer in self.peers() {
                    self.hub.sever(&self.local.id, &peer);
                }
                *self.hub.host.lock().unwrap_or_else(|e| e.into_inner()) = None;
                self.shut();
            }
            Role::Client => {
                if let Some(host) = self.host_id() {
                    self.hub.sever(&host, &self.local.id);
                }
                self.shut();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_join_announces_both_sides() {
        let net = MemoryNetwork::new();
        let (host, mut host_rx) = net.host("h", "host").unwrap();
        let (client, mut client_rx) = net.join("a", "alice", false).unwrap();

        assert_eq!(host.peers(), vec![PeerId::from("a")]);
        assert!(!host.connection(&PeerId::from("a")).unwrap().authenticated);
        assert_eq!(client.peers(), vec![PeerId::from("h")]);

        assert!(matches!(
            drain(&mut host_rx).as_slice(),
            [SessionEvent::PeerConnected(c)] if c.id.as_str() == "a"
        ));
        assert!(matches!(
            drain(&mut client_rx).as_slice(),
            [SessionEvent::PeerConnected(c)] if c.id.as_str() == "h"
        ));
    }

    #[test]
    fn test_send_records_delivery() {
        let net = MemoryNetwork::new();
        let (host, mut host_rx) = net.host("h", "host").unwrap();
        let (client, _client_rx) = net.join("a", "alice", true).unwrap();
        drain(&mut host_rx);

        client.send_to_host(b"ping".to_vec()).unwrap();
        let events = drain(&mut host_rx);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Data { from, bytes }] if from.as_str() == "a" && bytes == b"ping"
        ));
        assert_eq!(net.deliveries_to(&PeerId::from("h")).len(), 1);
        assert!(host.send_to_host(vec![]).is_err());
    }

    #[test]
    fn test_broadcast_reaches_every_client() {
        let net = MemoryNetwork::new();
        let (host, _host_rx) = net.host("h", "host").unwrap();
        let (_a, _a_rx) = net.join("a", "alice", true).unwrap();
        let (_b, _b_rx) = net.join("b", "bob", true).unwrap();

        host.broadcast(b"x".to_vec()).unwrap();
        assert_eq!(net.deliveries().len(), 2);
        assert_eq!(net.deliveries_to(&PeerId::from("a")).len(), 1);
        assert_eq!(net.deliveries_to(&PeerId::from("b")).len(), 1);
    }

    #[test]
    fn test_close_peer_closes_client() {
        let net = MemoryNetwork::new();
        let (host, mut host_rx) = net.host("h", "host").unwrap();
        let (client, mut client_rx) = net.join("a", "alice", true).unwrap();
        drain(&mut host_rx);
        drain(&mut client_rx);

        host.close_peer(&PeerId::from("a"));
        assert!(host.peers().is_empty());
        assert!(client.is_closed());
        assert!(matches!(
            drain(&mut host_rx).as_slice(),
            [SessionEvent::PeerDisconnected(_)]
        ));
        assert!(matches!(
            drain(&mut client_rx).as_slice(),
            [SessionEvent::PeerDisconnected(_), SessionEvent::Closed]
        ));
        assert!(matches!(
            host.send_to(&PeerId::from("a"), vec![]),
            Err(WireError::UnknownPeer(_))
        ));
    }

    #[test]
    fn test_duplicate_join_refused() {
        let net = MemoryNetwork::new();
        let (_host, _rx) = net.host("h", "host").unwrap();
        let _a = net.join("a", "alice", true).unwrap();
        assert!(net.join("a", "again", true).is_err());
        assert!(net.join("h", "imposter", true).is_err());
    }
}
