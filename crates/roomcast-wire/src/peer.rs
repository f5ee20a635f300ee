//! TcpSession: TCP transport implementing the [`Session`] contract.
//!
//! A host binds a listener and admits clients; a client connects to one
//! host. Every link opens with a [`Handshake`] exchange (hello, then welcome
//! or refusal) and afterwards carries length-framed application messages.
//!
//! Each link runs two tasks: a writer draining an unbounded queue, so sends
//! never block the caller, and a reader turning frames into
//! [`SessionEvent::Data`].

use crate::error::WireError;
use crate::message::*;
use crate::registry::{Connection, SessionRegistry};
use crate::session::{Session, SessionEvent};

use hmac::{Hmac, Mac};
use roomcast_types::{DisconnectReason, PeerId, Role, SessionConfig};
use sha2::Sha256;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Generate HMAC-SHA256 signature for peer authentication.
fn hmac_sign(secret: &str, data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify HMAC-SHA256 signature using constant-time comparison.
fn hmac_verify(secret: &str, data: &[u8], signature: &str) -> bool {
    let expected = hmac_sign(secret, data);
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into()
}

/// Fresh nonce and proof for `peer_id`. Without a secret the proof is empty.
fn credentials(secret: Option<&str>, peer_id: &PeerId) -> (String, String) {
    let nonce = hex::encode(rand::random::<[u8; 16]>());
    let proof = match secret {
        Some(secret) => hmac_sign(secret, format!("{nonce}{peer_id}").as_bytes()),
        None => String::new(),
    };
    (nonce, proof)
}

fn verify_credentials(secret: Option<&str>, peer_id: &PeerId, nonce: &str, proof: &str) -> bool {
    match secret {
        Some(secret) => hmac_verify(secret, format!("{nonce}{peer_id}").as_bytes(), proof),
        None => true,
    }
}

struct Link {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: AbortHandle,
}

/// State shared between the session handle and its link tasks.
struct Shared {
    role: Role,
    registry: SessionRegistry,
    links: Mutex<HashMap<PeerId, Link>>,
    /// Ids with a handshake in flight. Guarded by the `links` lock.
    pending: Mutex<HashSet<PeerId>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Shared {
    fn new(role: Role, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            role,
            registry: SessionRegistry::new(),
            links: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            events,
        }
    }

    /// Hold a slot for `peer` until its handshake finishes. Live links and
    /// in-flight handshakes both count toward `max_peers`.
    fn reserve(
        &self,
        peer: &PeerId,
        max_peers: usize,
    ) -> Result<Reservation<'_>, DisconnectReason> {
        let links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if links.contains_key(peer) || pending.contains(peer) {
            return Err(DisconnectReason::DuplicateCredential);
        }
        if links.len() + pending.len() >= max_peers {
            return Err(DisconnectReason::SessionFull);
        }
        pending.insert(peer.clone());
        Ok(Reservation {
            shared: self,
            peer: Some(peer.clone()),
        })
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Install a link for a handshaked peer and start its tasks.
    fn attach(
        self: &Arc<Self>,
        connection: Connection,
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
    ) {
        let (outbound, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, queue));

        let peer = connection.id.clone();
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&peer);
        self.registry.add(connection.clone());
        // Announce before the reader can emit any data from this peer.
        self.emit(SessionEvent::PeerConnected(connection));
        let reader_task = tokio::spawn(read_loop(reader, peer.clone(), Arc::clone(self)));
        links.insert(
            peer,
            Link {
                outbound,
                reader: reader_task.abort_handle(),
            },
        );
    }

    /// Tear down a link. Only the caller that actually removed it reports
    /// the disconnect, so racing closes emit one event.
    fn detach(&self, peer: &PeerId) -> bool {
        let link = {
            let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
            links.remove(peer)
        };
        match link {
            Some(link) => {
                // Dropping the sender lets the writer flush what is queued.
                link.reader.abort();
                self.registry.remove(peer);
                self.emit(SessionEvent::PeerDisconnected(peer.clone()));
                true
            }
            None => false,
        }
    }

    fn send(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), WireError> {
        let links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        let link = links
            .get(peer)
            .ok_or_else(|| WireError::UnknownPeer(peer.clone()))?;
        link.outbound
            .send(bytes)
            .map_err(|_| WireError::UnknownPeer(peer.clone()))
    }
}

/// A slot held for a handshake in progress. Dropping it without
/// [`Reservation::fulfil`] frees the slot.
struct Reservation<'a> {
    shared: &'a Shared,
    peer: Option<PeerId>,
}

impl Reservation<'_> {
    /// Keep the slot; [`Shared::attach`] converts it into a link.
    fn fulfil(mut self) {
        self.peer = None;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(peer) = self.peer.take() {
            let _links = self.shared.links.lock().unwrap_or_else(|e| e.into_inner());
            self.shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&peer);
        }
    }
}

/// Host admission settings.
struct Admission {
    local: Connection,
    secret: Option<String>,
    max_peers: usize,
    timeout: Duration,
}

/// A live session over TCP, in either role.
pub struct TcpSession {
    role: Role,
    local: Connection,
    host_id: Option<PeerId>,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: Mutex<Option<AbortHandle>>,
    closed: AtomicBool,
}

impl TcpSession {
    /// Bind the configured address and start admitting clients.
    pub async fn host(
        config: &SessionConfig,
        peer_id: PeerId,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>), WireError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            "Session: hosting on {} (peer_id={})",
            local_addr, peer_id
        );

        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(Role::Host, events));
        let local = Connection::new(peer_id, config.peer_name.clone(), true).with_address(local_addr);
        let admission = Arc::new(Admission {
            local: local.clone(),
            secret: config.shared_secret.clone(),
            max_peers: config.max_peers,
            timeout: Duration::from_secs(config.handshake_timeout_secs),
        });

        let accept = tokio::spawn(accept_loop(listener, admission, Arc::clone(&shared)));

        let session = Arc::new(Self {
            role: Role::Host,
            local,
            host_id: None,
            local_addr,
            shared,
            accept_task: Mutex::new(Some(accept.abort_handle())),
            closed: AtomicBool::new(false),
        });
        Ok((session, receiver))
    }

    /// Connect to a host and perform the handshake.
    pub async fn join(
        config: &SessionConfig,
        host_addr: SocketAddr,
        peer_id: PeerId,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>), WireError> {
        info!("Session: connecting to host at {}", host_addr);
        let stream = TcpStream::connect(host_addr).await?;
        let local_addr = stream.local_addr()?;
        let (mut reader, mut writer) = stream.into_split();

        let secret = config.shared_secret.as_deref();
        let (nonce, auth_hmac) = credentials(secret, &peer_id);
        let hello = Handshake::Hello {
            peer_id: peer_id.clone(),
            peer_name: config.peer_name.clone(),
            protocol_version: PROTOCOL_VERSION,
            nonce,
            auth_hmac,
        };
        write_frame(&mut writer, &encode_handshake(&hello)?).await?;

        let timeout = Duration::from_secs(config.handshake_timeout_secs);
        let body = tokio::time::timeout(timeout, read_frame(&mut reader))
            .await
            .map_err(|_| WireError::HandshakeFailed("Timed out waiting for host".into()))??;

        let host = match decode_handshake(&body)? {
            Handshake::Welcome {
                peer_id: host_id,
                peer_name,
                protocol_version,
                nonce,
                auth_hmac,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(WireError::VersionMismatch {
                        local: PROTOCOL_VERSION,
                        remote: protocol_version,
                    });
                }
                if !verify_credentials(secret, &host_id, &nonce, &auth_hmac) {
                    return Err(WireError::HandshakeFailed(
                        "HMAC verification failed on Welcome".into(),
                    ));
                }
                info!("Session: joined {} ({})", peer_name, host_id);
                Connection::new(host_id, peer_name, true).with_address(host_addr)
            }
            Handshake::Refused { reason, message } => {
                warn!(code = reason.code(), "Session: host refused us: {}", message);
                return Err(WireError::Refused(reason));
            }
            Handshake::Hello { .. } => {
                return Err(WireError::HandshakeFailed(
                    "Unexpected hello from host".to_string(),
                ));
            }
        };

        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(Role::Client, events));
        let host_id = host.id.clone();
        shared.attach(host, reader, writer);

        let session = Arc::new(Self {
            role: Role::Client,
            local: Connection::new(peer_id, config.peer_name.clone(), true).with_address(local_addr),
            host_id: Some(host_id),
            local_addr,
            shared,
            accept_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        Ok((session, receiver))
    }

    /// Get the actual bound (host) or local (client) address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Session for TcpSession {
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
        self.shared.registry.get(peer)
    }

    fn peers(&self) -> Vec<PeerId> {
        self.shared.registry.peer_ids()
    }

    fn send_to_host(&self, bytes: Vec<u8>) -> Result<(), WireError> {
        match &self.host_id {
            Some(host_id) => self.shared.send(host_id, bytes),
            None => Err(WireError::WrongRole {
                operation: "send_to_host",
                role: self.role,
            }),
        }
    }

    fn broadcast(&self, bytes: Vec<u8>) -> Result<(), WireError> {
        if self.role != Role::Host {
            return Err(WireError::WrongRole {
                operation: "broadcast",
                role: self.role,
            });
        }
        for peer in self.peers() {
            if let Err(e) = self.shared.send(&peer, bytes.clone()) {
                debug!(peer = %peer, error = %e, "Session: broadcast skipped peer");
            }
        }
        Ok(())
    }

    fn send_to(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), WireError> {
        self.shared.send(peer, bytes)
    }

    fn close_peer(&self, peer: &PeerId) {
        if self.shared.detach(peer) {
            info!(peer = %peer, "Session: closed link");
            if self.host_id.as_ref() == Some(peer) {
                self.closed.store(true, Ordering::SeqCst);
                self.shared.emit(SessionEvent::Closed);
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(accept) = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            accept.abort();
        }
        for peer in self.peers() {
            self.shared.detach(&peer);
        }
        info!("Session: closed");
        self.shared.emit(SessionEvent::Closed);
    }
}

/// Accept loop, run in a spawned task.
async fn accept_loop(listener: TcpListener, admission: Arc<Admission>, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Session: accepted connection from {}", addr);
                let admission = Arc::clone(&admission);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    if let Err(e) = admit(stream, addr, &admission, &shared).await {
                        debug!("Session: inbound handshake from {} ended: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Session: accept error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Send a refusal frame and produce the matching error.
async fn refuse(writer: &mut OwnedWriteHalf, reason: DisconnectReason) -> WireError {
    let refusal = Handshake::Refused {
        reason,
        message: reason.message().to_string(),
    };
    if let Ok(body) = encode_handshake(&refusal) {
        let _ = write_frame(writer, &body).await;
    }
    let _ = writer.shutdown().await;
    WireError::Refused(reason)
}

/// Run the host side of a handshake and attach the peer on success.
async fn admit(
    stream: TcpStream,
    addr: SocketAddr,
    admission: &Admission,
    shared: &Arc<Shared>,
) -> Result<(), WireError> {
    let (mut reader, mut writer) = stream.into_split();

    let body = tokio::time::timeout(admission.timeout, read_frame(&mut reader))
        .await
        .map_err(|_| WireError::HandshakeFailed("Timed out waiting for hello".into()))??;

    let (peer_id, peer_name, nonce, auth_hmac) = match decode_handshake(&body) {
        Ok(Handshake::Hello {
            peer_id,
            peer_name,
            protocol_version,
            nonce,
            auth_hmac,
        }) => {
            if protocol_version != PROTOCOL_VERSION {
                refuse(&mut writer, DisconnectReason::VersionMismatch).await;
                return Err(WireError::VersionMismatch {
                    local: PROTOCOL_VERSION,
                    remote: protocol_version,
                });
            }
            (peer_id, peer_name, nonce, auth_hmac)
        }
        _ => {
            warn!("Session: {} opened without a valid hello", addr);
            return Err(refuse(&mut writer, DisconnectReason::InvalidClientInfo).await);
        }
    };

    if peer_id.as_str().trim().is_empty() || peer_name.trim().is_empty() {
        return Err(refuse(&mut writer, DisconnectReason::InvalidClientInfo).await);
    }
    if peer_id == admission.local.id {
        warn!(peer = %peer_id, "Session: duplicate peer id from {}", addr);
        return Err(refuse(&mut writer, DisconnectReason::DuplicateCredential).await);
    }
    let reservation = match shared.reserve(&peer_id, admission.max_peers) {
        Ok(reservation) => reservation,
        Err(reason) => {
            warn!(peer = %peer_id, code = reason.code(), "Session: refusing {}", addr);
            return Err(refuse(&mut writer, reason).await);
        }
    };

    let authenticated =
        verify_credentials(admission.secret.as_deref(), &peer_id, &nonce, &auth_hmac);
    if !authenticated {
        warn!(peer = %peer_id, "Session: admitting peer without valid credentials");
    }

    let (ack_nonce, ack_hmac) = credentials(admission.secret.as_deref(), &admission.local.id);
    let welcome = Handshake::Welcome {
        peer_id: admission.local.id.clone(),
        peer_name: admission.local.name.clone(),
        protocol_version: PROTOCOL_VERSION,
        nonce: ack_nonce,
        auth_hmac: ack_hmac,
    };
    write_frame(&mut writer, &encode_handshake(&welcome)?).await?;

    info!(
        "Session: handshake with {} ({}) from {}, authenticated={}",
        peer_name, peer_id, addr, authenticated
    );

    let connection = Connection::new(peer_id, peer_name, authenticated).with_address(addr);
    reservation.fulfil();
    shared.attach(connection, reader, writer);
    Ok(())
}

/// Read frames until the link ends, then detach it.
async fn read_loop(mut reader: OwnedReadHalf, peer: PeerId, shared: Arc<Shared>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(bytes) => shared.emit(SessionEvent::Data {
                from: peer.clone(),
                bytes,
            }),
            Err(WireError::ConnectionClosed) => {
                debug!(peer = %peer, "Session: link closed by remote");
                break;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Session: link read failed");
                break;
            }
        }
    }
    if shared.detach(&peer) && shared.role == Role::Client {
        shared.emit(SessionEvent::Closed);
    }
}

/// Drain a link's outbound queue onto the socket.
async fn write_loop(mut writer: OwnedWriteHalf, mut queue: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = queue.recv().await {
        if let Err(e) = write_frame(&mut writer, &bytes).await {
            debug!(error = %e, "Session: link write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_config() -> SessionConfig {
        SessionConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            peer_name: "host".to_string(),
            shared_secret: Some("test-secret-for-unit-tests".to_string()),
            max_peers: 4,
            handshake_timeout_secs: 5,
        }
    }

    fn client_config(name: &str, secret: Option<&str>) -> SessionConfig {
        SessionConfig {
            peer_name: name.to_string(),
            shared_secret: secret.map(String::from),
            ..host_config()
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_host_and_join() {
        let (host, mut host_rx) = TcpSession::host(&host_config(), PeerId::from("h"))
            .await
            .unwrap();
        let (client, _client_rx) = TcpSession::join(
            &client_config("alice", Some("test-secret-for-unit-tests")),
            host.local_addr(),
            PeerId::from("a"),
        )
        .await
        .unwrap();

        match next_event(&mut host_rx).await {
            SessionEvent::PeerConnected(conn) => {
                assert_eq!(conn.id.as_str(), "a");
                assert_eq!(conn.name, "alice");
                assert!(conn.authenticated);
            }
            other => panic!("Expected PeerConnected, got {other:?}"),
        }
        assert_eq!(host.peers(), vec![PeerId::from("a")]);
        assert_eq!(client.peers(), vec![PeerId::from("h")]);
        assert!(client.connection(&PeerId::from("h")).unwrap().authenticated);
        assert!(host.is_host());
        assert!(!client.is_host());
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (host, mut host_rx) = TcpSession::host(&host_config(), PeerId::from("h"))
            .await
            .unwrap();
        let (client, mut client_rx) = TcpSession::join(
            &client_config("alice", Some("test-secret-for-unit-tests")),
            host.local_addr(),
            PeerId::from("a"),
        )
        .await
        .unwrap();
        assert!(matches!(client_rx.recv().await, Some(SessionEvent::PeerConnected(_))));
        assert!(matches!(next_event(&mut host_rx).await, SessionEvent::PeerConnected(_)));

        client.send_to_host(b"RPC{}".to_vec()).unwrap();
        match next_event(&mut host_rx).await {
            SessionEvent::Data { from, bytes } => {
                assert_eq!(from.as_str(), "a");
                assert_eq!(bytes, b"RPC{}");
            }
            other => panic!("Expected Data, got {other:?}"),
        }

        host.broadcast(b"hello".to_vec()).unwrap();
        match next_event(&mut client_rx).await {
            SessionEvent::Data { from, bytes } => {
                assert_eq!(from.as_str(), "h");
                assert_eq!(bytes, b"hello");
            }
            other => panic!("Expected Data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_secret_admitted_unauthenticated() {
        let (host, mut host_rx) = TcpSession::host(&host_config(), PeerId::from("h"))
            .await
            .unwrap();
        // The client cannot verify the host either, so its join fails,
        // but the host has already admitted it as a guest.
        let joined = TcpSession::join(
            &client_config("mallory", Some("wrong-secret")),
            host.local_addr(),
            PeerId::from("m"),
        )
        .await;
        assert!(matches!(joined, Err(WireError::HandshakeFailed(_))));

        match next_event(&mut host_rx).await {
            SessionEvent::PeerConnected(conn) => assert!(!conn.authenticated),
            other => panic!("Expected PeerConnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_session_authenticates_everyone() {
        let config = SessionConfig {
            shared_secret: None,
            ..host_config()
        };
        let (host, mut host_rx) = TcpSession::host(&config, PeerId::from("h")).await.unwrap();
        let _client = TcpSession::join(&client_config("bob", None), host.local_addr(), PeerId::from("b"))
            .await
            .unwrap();
        match next_event(&mut host_rx).await {
            SessionEvent::PeerConnected(conn) => assert!(conn.authenticated),
            other => panic!("Expected PeerConnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_session_full_refused() {
        let config = SessionConfig {
            max_peers: 1,
            ..host_config()
        };
        let secret = Some("test-secret-for-unit-tests");
        let (host, mut host_rx) = TcpSession::host(&config, PeerId::from("h")).await.unwrap();
        let _first = TcpSession::join(&client_config("a", secret), host.local_addr(), PeerId::from("a"))
            .await
            .unwrap();
        assert!(matches!(next_event(&mut host_rx).await, SessionEvent::PeerConnected(_)));

        let second =
            TcpSession::join(&client_config("b", secret), host.local_addr(), PeerId::from("b")).await;
        assert!(matches!(
            second,
            Err(WireError::Refused(DisconnectReason::SessionFull))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_peer_id_refused() {
        let secret = Some("test-secret-for-unit-tests");
        let (host, mut host_rx) = TcpSession::host(&host_config(), PeerId::from("h"))
            .await
            .unwrap();
        let _first = TcpSession::join(&client_config("a", secret), host.local_addr(), PeerId::from("a"))
            .await
            .unwrap();
        assert!(matches!(next_event(&mut host_rx).await, SessionEvent::PeerConnected(_)));

        let dup =
            TcpSession::join(&client_config("a2", secret), host.local_addr(), PeerId::from("a")).await;
        assert!(matches!(
            dup,
            Err(WireError::Refused(DisconnectReason::DuplicateCredential))
        ));
    }

    #[test]
    fn test_reservation_holds_slot_until_released() {
        let (events, _rx) = mpsc::unbounded_channel();
        let shared = Shared::new(Role::Host, events);
        let a = PeerId::from("a");

        let first = shared.reserve(&a, 2).unwrap();
        assert!(matches!(
            shared.reserve(&a, 2),
            Err(DisconnectReason::DuplicateCredential)
        ));
        let second = shared.reserve(&PeerId::from("b"), 2).unwrap();
        assert!(matches!(
            shared.reserve(&PeerId::from("c"), 2),
            Err(DisconnectReason::SessionFull)
        ));

        drop(first);
        drop(second);
        assert!(shared.reserve(&a, 2).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_admit_one() {
        let config = SessionConfig {
            shared_secret: None,
            max_peers: 1,
            ..host_config()
        };
        for (first, second) in [("a", "a"), ("a", "b")].into_iter().cycle().take(40) {
            let (host, mut host_rx) = TcpSession::host(&config, PeerId::from("h")).await.unwrap();
            let addr = host.local_addr();
            let first_config = client_config(first, None);
            let second_config = client_config(second, None);
            let (left, right) = tokio::join!(
                TcpSession::join(&first_config, addr, PeerId::from(first)),
                TcpSession::join(&second_config, addr, PeerId::from(second)),
            );
            let admitted = left.is_ok() as usize + right.is_ok() as usize;
            let refused = matches!(left, Err(WireError::Refused(_))) as usize
                + matches!(right, Err(WireError::Refused(_))) as usize;
            assert_eq!((admitted, refused), (1, 1), "joins {first}/{second}");

            assert!(matches!(
                next_event(&mut host_rx).await,
                SessionEvent::PeerConnected(_)
            ));
            assert_eq!(host.peers().len(), 1);
            assert!(host_rx.try_recv().is_err());
            host.close();
        }
    }

    #[tokio::test]
    async fn test_close_peer_flushes_then_closes_client() {
        let secret = Some("test-secret-for-unit-tests");
        let (host, mut host_rx) = TcpSession::host(&host_config(), PeerId::from("h"))
            .await
            .unwrap();
        let (_client, mut client_rx) =
            TcpSession::join(&client_config("a", secret), host.local_addr(), PeerId::from("a"))
                .await
                .unwrap();
        assert!(matches!(next_event(&mut host_rx).await, SessionEvent::PeerConnected(_)));
        assert!(matches!(next_event(&mut client_rx).await, SessionEvent::PeerConnected(_)));

        let target = PeerId::from("a");
        host.send_to(&target, b"bye".to_vec()).unwrap();
        host.close_peer(&target);
        assert!(matches!(
            next_event(&mut host_rx).await,
            SessionEvent::PeerDisconnected(_)
        ));
        assert!(matches!(
            host.send_to(&target, b"late".to_vec()),
            Err(WireError::UnknownPeer(_))
        ));

        match next_event(&mut client_rx).await {
            SessionEvent::Data { bytes, .. } => assert_eq!(bytes, b"bye"),
            other => panic!("Expected Data, got {other:?}"),
        }
        assert!(matches!(
            next_event(&mut client_rx).await,
            SessionEvent::PeerDisconnected(_)
        ));
        assert!(matches!(next_event(&mut client_rx).await, SessionEvent::Closed));
    }

    #[tokio::test]
    async fn test_role_restricted_sends() {
        let (host, _rx) = TcpSession::host(&host_config(), PeerId::from("h"))
            .await
            .unwrap();
        assert!(matches!(
            host.send_to_host(vec![]),
            Err(WireError::WrongRole { .. })
        ));
    }
}
