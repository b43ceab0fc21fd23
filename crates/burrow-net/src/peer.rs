//! Peer registry for the server role
//!
//! Peers are discovered implicitly: any address that completes a handshake
//! or delivers a decryptable datagram is registered alive. There is no
//! removal path; a failed send only clears the liveness flag, and a later
//! handshake resurrects the entry. The table lives exactly as long as the
//! socket that owns it.

use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Address-keyed liveness table owned by the server socket.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<SocketAddr, bool>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `addr` as alive. Idempotent: re-registering an existing
    /// peer keeps a single entry and sets the flag back to alive.
    pub fn register(&mut self, addr: SocketAddr) {
        self.peers.insert(addr, true);
    }

    /// Mark a peer dead after a failed send. Unknown addresses are ignored.
    pub fn mark_dead(&mut self, addr: SocketAddr) {
        if let Some(alive) = self.peers.get_mut(&addr) {
            *alive = false;
        }
    }

    /// Is this address registered and alive?
    pub fn is_alive(&self, addr: &SocketAddr) -> bool {
        self.peers.get(addr).copied().unwrap_or(false)
    }

    /// Pick one alive peer uniformly at random, spreading load across every
    /// live peer instead of sticking to the last good one.
    pub fn choose_alive(&self) -> Option<SocketAddr> {
        let alive: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, &alive)| alive)
            .map(|(addr, _)| *addr)
            .collect();
        alive.choose(&mut rand::thread_rng()).copied()
    }

    /// Total registered entries, dead ones included.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Number of currently alive peers.
    pub fn alive_count(&self) -> usize {
        self.peers.values().filter(|&&alive| alive).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn test_registration_idempotent() {
        let mut table = PeerTable::new();
        for _ in 0..5 {
            table.register(addr(9000));
        }
        assert_eq!(table.len(), 1);
        assert_eq!(table.alive_count(), 1);
    }

    #[test]
    fn test_mark_dead_and_resurrect() {
        let mut table = PeerTable::new();
        table.register(addr(9000));

        table.mark_dead(addr(9000));
        assert!(!table.is_alive(&addr(9000)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.choose_alive(), None);

        // Only a fresh handshake registration brings the peer back.
        table.register(addr(9000));
        assert!(table.is_alive(&addr(9000)));
        assert_eq!(table.choose_alive(), Some(addr(9000)));
    }

    #[test]
    fn test_mark_dead_unknown_is_noop() {
        let mut table = PeerTable::new();
        table.mark_dead(addr(9000));
        assert!(table.is_empty());
    }

    #[test]
    fn test_choose_skips_dead_peers() {
        let mut table = PeerTable::new();
        table.register(addr(9000));
        table.register(addr(9001));
        table.mark_dead(addr(9000));

        for _ in 0..20 {
            assert_eq!(table.choose_alive(), Some(addr(9001)));
        }
    }
}
