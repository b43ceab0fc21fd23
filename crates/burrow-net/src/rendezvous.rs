//! Rendezvous socket roles
//!
//! A UDP endpoint in one of two roles. The server answers the cleartext
//! handshake phrase from anyone, keeps an address-keyed peer registry, and
//! seals outbound payloads inside the timestamped envelope. The client
//! talks to one fixed peer, heartbeats the phrase until answered, and
//! relays everything else verbatim.
//!
//! `receive` has three distinct outcomes at every call site: a payload, an
//! internally digested datagram (`None`), or a transport failure. Nothing
//! is swallowed behind a catch-all.

use crate::cipher::{Cipher, CipherError};
use crate::envelope;
use crate::peer::PeerTable;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::debug;

/// Cleartext rendezvous phrase. Used only to discover reachability and
/// peer addresses; it never carries payload.
pub const HANDSHAKE_PHRASE: &str =
    "Across the Great Wall, we can reach every corner in the world.";

/// Well-known local rendezvous port for the server role.
pub const RENDEZVOUS_PORT: u16 = 64089;

/// Largest datagram either role will accept.
pub const MAX_DATAGRAM: usize = 65536;

/// How often the client re-sends the handshake phrase once connected.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Rendezvous socket errors
#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),
}

fn is_handshake(datagram: &[u8]) -> bool {
    std::str::from_utf8(datagram)
        .map(|s| s.trim() == HANDSHAKE_PHRASE)
        .unwrap_or(false)
}

/// Multi-peer, answer-on-handshake role.
///
/// Owns the peer registry for its whole lifetime; entries are never
/// removed, only toggled between alive and dead.
pub struct ServerSocket {
    socket: UdpSocket,
    cipher: Cipher,
    peers: PeerTable,
    last_sent: f64,
    last_received: f64,
}

impl ServerSocket {
    /// Bind the rendezvous address. Failure here is fatal setup and must
    /// abort startup before the relay loop begins.
    pub async fn bind(addr: SocketAddr, cipher: Cipher) -> Result<Self, RendezvousError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            cipher,
            peers: PeerTable::new(),
            last_sent: 0.0,
            last_received: 0.0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RendezvousError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive one datagram.
    ///
    /// `Ok(Some(_))` carries an application payload. `Ok(None)` means the
    /// datagram was digested internally: a handshake (answered and the
    /// sender registered), an undecryptable blob, or a truncated envelope.
    /// `Err(_)` is a transport failure on the socket itself.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, RendezvousError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, sender) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);

        if is_handshake(&buf) {
            self.peers.register(sender);
            // Best-effort echo; the peer's own heartbeat cadence retries.
            match self
                .socket
                .send_to(HANDSHAKE_PHRASE.as_bytes(), sender)
                .await
            {
                Ok(_) => debug!(peer = %sender, "handshake answered"),
                Err(err) => debug!(peer = %sender, %err, "handshake echo failed"),
            }
            return Ok(None);
        }

        let body = match self.cipher.decrypt(&buf) {
            Ok(body) => body,
            Err(err) => {
                debug!(peer = %sender, %err, "datagram dropped");
                return Ok(None);
            }
        };
        let (timestamp, payload) = match envelope::decode(&body) {
            Ok(parts) => parts,
            Err(err) => {
                debug!(peer = %sender, %err, "envelope dropped");
                return Ok(None);
            }
        };

        self.last_received = self.last_received.max(timestamp);
        self.peers.register(sender);
        Ok(Some(payload.to_vec()))
    }

    /// Seal and send a payload to one alive peer chosen uniformly at
    /// random.
    ///
    /// A silent no-op while no peer is alive. A transport failure marks
    /// the chosen peer dead and is swallowed; recovery happens through the
    /// peer's own handshake cadence, not retries.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), RendezvousError> {
        let Some(peer) = self.peers.choose_alive() else {
            return Ok(());
        };

        self.last_sent = envelope::unix_now();
        let body = envelope::encode(self.last_sent, payload);
        let sealed = self.cipher.encrypt(&body)?;

        if let Err(err) = self.socket.send_to(&sealed, peer).await {
            debug!(peer = %peer, %err, "send failed, marking peer dead");
            self.peers.mark_dead(peer);
        }
        Ok(())
    }

    /// Reserved per-wake maintenance hook for peer liveness bookkeeping.
    pub fn clean(&mut self) {}

    /// Freshness watermark of outbound traffic.
    pub fn last_sent(&self) -> f64 {
        self.last_sent
    }

    /// Freshest timestamp observed on inbound traffic.
    pub fn last_received(&self) -> f64 {
        self.last_received
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Release the transport handle.
    pub fn close(self) {
        debug!("rendezvous socket shutting down");
        drop(self.socket);
    }
}

/// Single fixed-peer role with a periodic cleartext heartbeat.
///
/// This role never unseals inbound traffic itself: non-handshake datagrams
/// from the fixed peer are handed back verbatim for the caller to
/// interpret.
pub struct ClientSocket {
    socket: UdpSocket,
    peer: SocketAddr,
    connected: bool,
    last_heartbeat: Option<Instant>,
}

impl ClientSocket {
    /// Bind an ephemeral local port toward a fixed rendezvous server.
    pub async fn connect(peer: SocketAddr) -> Result<Self, RendezvousError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            peer,
            connected: false,
            last_heartbeat: None,
        })
    }

    /// Has the fixed peer answered our handshake?
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send the handshake phrase when unconnected, or once per interval to
    /// keep the server's view of this peer fresh. A transport failure
    /// degrades `connected` instead of propagating.
    pub async fn heartbeat(&mut self) {
        let due = !self.connected
            || self
                .last_heartbeat
                .map_or(true, |t| t.elapsed() > HEARTBEAT_INTERVAL);
        if !due {
            return;
        }

        self.last_heartbeat = Some(Instant::now());
        if let Err(err) = self
            .socket
            .send_to(HANDSHAKE_PHRASE.as_bytes(), self.peer)
            .await
        {
            debug!(%err, "heartbeat failed");
            self.connected = false;
        }
    }

    /// Receive one datagram from the fixed peer.
    ///
    /// Datagrams from any other address are discarded: the phrase is not
    /// authenticated, so address matching is the only check at this stage.
    /// The handshake phrase flips `connected`; anything else comes back
    /// unmodified.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, RendezvousError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, sender) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);

        if sender != self.peer {
            debug!(%sender, "datagram from unexpected address discarded");
            return Ok(None);
        }
        if is_handshake(&buf) {
            debug!(peer = %self.peer, "rendezvous established");
            self.connected = true;
            return Ok(None);
        }
        Ok(Some(buf))
    }

    /// Send raw bytes to the fixed peer; a no-op until connected. A
    /// transport failure degrades `connected` instead of propagating.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), RendezvousError> {
        if !self.connected {
            return Ok(());
        }
        if let Err(err) = self.socket.send_to(payload, self.peer).await {
            debug!(%err, "send failed, connection degraded");
            self.connected = false;
        }
        Ok(())
    }

    /// Release the transport handle.
    pub fn close(self) {
        debug!("rendezvous socket shutting down");
        drop(self.socket);
    }
}

/// Role-dispatching wrapper the relay loop drives.
pub enum RendezvousSocket {
    Server(ServerSocket),
    Client(ClientSocket),
}

impl RendezvousSocket {
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, RendezvousError> {
        match self {
            Self::Server(server) => server.receive().await,
            Self::Client(client) => client.receive().await,
        }
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<(), RendezvousError> {
        match self {
            Self::Server(server) => server.send(payload).await,
            Self::Client(client) => client.send(payload).await,
        }
    }

    /// Per-wake maintenance: peer bookkeeping on the server, heartbeat on
    /// the client.
    pub async fn maintain(&mut self) {
        match self {
            Self::Server(server) => server.clean(),
            Self::Client(client) => client.heartbeat().await,
        }
    }

    pub fn close(self) {
        match self {
            Self::Server(server) => server.close(),
            Self::Client(client) => client.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    async fn bind_server(key: &str) -> ServerSocket {
        ServerSocket::bind("127.0.0.1:0".parse().unwrap(), Cipher::new(key))
            .await
            .unwrap()
    }

    /// Seal a payload the way the server role does on send.
    fn seal(cipher: &Cipher, timestamp: f64, payload: &[u8]) -> Vec<u8> {
        cipher
            .encrypt(&envelope::encode(timestamp, payload))
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_without_alive_peers_is_noop() {
        let mut server = bind_server("key").await;
        server.send(b"payload").await.unwrap();
        assert_eq!(server.peers().alive_count(), 0);
        assert_eq!(server.last_sent(), 0.0);
    }

    #[tokio::test]
    async fn test_handshake_registers_once_and_echoes() {
        let mut server = bind_server("key").await;
        let server_addr = server.local_addr().unwrap();

        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..3 {
            probe
                .send_to(HANDSHAKE_PHRASE.as_bytes(), server_addr)
                .await
                .unwrap();
            let received = timeout(RECV_TIMEOUT, server.receive())
                .await
                .unwrap()
                .unwrap();
            assert!(received.is_none());
        }

        assert_eq!(server.peers().len(), 1);
        assert_eq!(server.peers().alive_count(), 1);

        // Every handshake is answered with the phrase itself.
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, from) = timeout(RECV_TIMEOUT, probe.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, server_addr);
        assert_eq!(&buf[..len], HANDSHAKE_PHRASE.as_bytes());
    }

    #[tokio::test]
    async fn test_trailing_whitespace_still_matches_handshake() {
        let mut server = bind_server("key").await;
        let server_addr = server.local_addr().unwrap();

        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let padded = format!("{HANDSHAKE_PHRASE}\n");
        probe.send_to(padded.as_bytes(), server_addr).await.unwrap();

        let received = timeout(RECV_TIMEOUT, server.receive())
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
        assert_eq!(server.peers().alive_count(), 1);
    }

    #[tokio::test]
    async fn test_handshake_from_vanished_sender_still_digested() {
        let mut server = bind_server("key").await;
        let server_addr = server.local_addr().unwrap();

        // The sender disappears before the echo can be delivered; the
        // handshake must still register without surfacing an error.
        {
            let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            probe
                .send_to(HANDSHAKE_PHRASE.as_bytes(), server_addr)
                .await
                .unwrap();
        }

        let received = timeout(RECV_TIMEOUT, server.receive())
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
        assert_eq!(server.peers().alive_count(), 1);
    }

    #[tokio::test]
    async fn test_decrypt_failure_then_handshake_registers_peer() {
        let mut server = bind_server("key").await;
        let server_addr = server.local_addr().unwrap();
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Garbage first: dropped without registering the sender.
        probe.send_to(b"not a valid datagram", server_addr).await.unwrap();
        let received = timeout(RECV_TIMEOUT, server.receive())
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
        assert_eq!(server.peers().len(), 0);

        // Then a valid handshake from the same address.
        probe
            .send_to(HANDSHAKE_PHRASE.as_bytes(), server_addr)
            .await
            .unwrap();
        let received = timeout(RECV_TIMEOUT, server.receive())
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
        assert_eq!(server.peers().len(), 1);
        assert!(server.peers().is_alive(&probe.local_addr().unwrap()));
    }

    #[tokio::test]
    async fn test_envelope_boundary_seven_vs_eight_bytes() {
        let cipher = Cipher::new("key");
        let mut server = bind_server("key").await;
        let server_addr = server.local_addr().unwrap();
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // 7-byte decrypted body: no payload, sender not registered.
        let short = cipher.encrypt(&[0u8; 7]).unwrap();
        probe.send_to(&short, server_addr).await.unwrap();
        let received = timeout(RECV_TIMEOUT, server.receive())
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
        assert_eq!(server.peers().len(), 0);

        // Exactly 8 bytes: a valid, empty payload.
        let exact = cipher.encrypt(&envelope::encode(42.0, b"")).unwrap();
        probe.send_to(&exact, server_addr).await.unwrap();
        let received = timeout(RECV_TIMEOUT, server.receive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Some(Vec::new()));
        assert_eq!(server.peers().len(), 1);
    }

    #[tokio::test]
    async fn test_received_watermark_keeps_maximum() {
        let cipher = Cipher::new("key");
        let mut server = bind_server("key").await;
        let server_addr = server.local_addr().unwrap();
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Fresher timestamp arrives first; the stale one must not lower
        // the watermark.
        probe
            .send_to(&seal(&cipher, 200.0, b"a"), server_addr)
            .await
            .unwrap();
        probe
            .send_to(&seal(&cipher, 100.0, b"b"), server_addr)
            .await
            .unwrap();

        for _ in 0..2 {
            timeout(RECV_TIMEOUT, server.receive())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(server.last_received(), 200.0);
    }

    #[tokio::test]
    async fn test_send_skips_dead_peer_until_rehandshake() {
        let mut server = bind_server("key").await;
        let server_addr = server.local_addr().unwrap();
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let probe_addr = probe.local_addr().unwrap();

        probe
            .send_to(HANDSHAKE_PHRASE.as_bytes(), server_addr)
            .await
            .unwrap();
        timeout(RECV_TIMEOUT, server.receive())
            .await
            .unwrap()
            .unwrap();
        let mut buf = [0u8; MAX_DATAGRAM];
        timeout(RECV_TIMEOUT, probe.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        // A dead peer is invisible to send.
        server.peers.mark_dead(probe_addr);
        server.send(b"lost").await.unwrap();
        assert!(timeout(Duration::from_millis(200), probe.recv_from(&mut buf))
            .await
            .is_err());

        // A fresh handshake resurrects it.
        probe
            .send_to(HANDSHAKE_PHRASE.as_bytes(), server_addr)
            .await
            .unwrap();
        timeout(RECV_TIMEOUT, server.receive())
            .await
            .unwrap()
            .unwrap();
        timeout(RECV_TIMEOUT, probe.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        server.send(b"found").await.unwrap();
        let (len, _) = timeout(RECV_TIMEOUT, probe.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let body = Cipher::new("key").decrypt(&buf[..len]).unwrap();
        let (_, payload) = envelope::decode(&body).unwrap();
        assert_eq!(payload, b"found");
        assert!(server.last_sent() > 0.0);
    }

    #[tokio::test]
    async fn test_client_send_before_connect_is_noop() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut client = ClientSocket::connect(peer.local_addr().unwrap())
            .await
            .unwrap();

        assert!(!client.is_connected());
        client.send(b"payload").await.unwrap();

        let mut buf = [0u8; MAX_DATAGRAM];
        assert!(timeout(Duration::from_millis(200), peer.recv_from(&mut buf))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_client_discards_foreign_sender() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut client = ClientSocket::connect(peer.local_addr().unwrap())
            .await
            .unwrap();

        // Learn the client's ephemeral address via a heartbeat.
        client.heartbeat().await;
        let mut buf = [0u8; MAX_DATAGRAM];
        let (_, client_addr) = timeout(RECV_TIMEOUT, peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        // A spoofed handshake from a third party must not connect us.
        stranger
            .send_to(HANDSHAKE_PHRASE.as_bytes(), client_addr)
            .await
            .unwrap();
        let received = timeout(RECV_TIMEOUT, client.receive())
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_heartbeat_throttled_while_connected() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut client = ClientSocket::connect(peer.local_addr().unwrap())
            .await
            .unwrap();
        client.connected = true;
        client.last_heartbeat = Some(Instant::now());

        // Connected with a fresh beat: nothing goes out.
        client.heartbeat().await;
        let mut buf = [0u8; MAX_DATAGRAM];
        assert!(timeout(Duration::from_millis(200), peer.recv_from(&mut buf))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_end_to_end_handshake_then_ping() {
        let cipher = Cipher::new("shared key");
        let mut server = bind_server("shared key").await;
        let server_addr = server.local_addr().unwrap();
        let mut client = ClientSocket::connect(server_addr).await.unwrap();

        // Client announces itself; server answers; client observes it.
        client.heartbeat().await;
        let received = timeout(RECV_TIMEOUT, server.receive())
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());

        let received = timeout(RECV_TIMEOUT, client.receive())
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
        assert!(client.is_connected());

        // The client relays an opaque sealed blob; the server unseals it.
        let sealed = seal(&cipher, envelope::unix_now(), b"PING");
        client.send(&sealed).await.unwrap();

        let received = timeout(RECV_TIMEOUT, server.receive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.as_deref(), Some(b"PING".as_slice()));

        // And the reverse path hands the client raw sealed bytes.
        server.send(b"PONG").await.unwrap();
        let raw = timeout(RECV_TIMEOUT, client.receive())
            .await
            .unwrap()
            .unwrap()
            .expect("payload");
        let body = cipher.decrypt(&raw).unwrap();
        let (_, payload) = envelope::decode(&body).unwrap();
        assert_eq!(payload, b"PONG");
    }
}
