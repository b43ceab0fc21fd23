//! Rendezvous datagram transport for the burrow tunnel
//!
//! This crate provides:
//! - Shared-key datagram sealing (ChaCha20-Poly1305 under a BLAKE3-derived key)
//! - The timestamped plaintext envelope
//! - The server-side peer registry
//! - The rendezvous socket roles the relay loop drives

pub mod cipher;
pub mod envelope;
pub mod peer;
pub mod rendezvous;

pub use cipher::{Cipher, CipherError};
pub use envelope::EnvelopeError;
pub use peer::PeerTable;
pub use rendezvous::{
    ClientSocket, RendezvousError, RendezvousSocket, ServerSocket, HANDSHAKE_PHRASE,
    RENDEZVOUS_PORT,
};
