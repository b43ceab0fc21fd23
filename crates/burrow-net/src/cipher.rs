//! Symmetric sealing for rendezvous datagrams
//!
//! Each datagram is sealed independently with ChaCha20-Poly1305 under a key
//! derived from the shared passphrase. A fresh random nonce is prepended to
//! every ciphertext, so datagrams may be lost, reordered, or duplicated
//! without affecting any other datagram.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Nonce length prepended to every sealed datagram.
pub const NONCE_LEN: usize = 12;

/// Cipher errors
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("AEAD encryption failed")]
    EncryptionFailed,
    #[error("AEAD decryption failed")]
    DecryptionFailed,
    #[error("Ciphertext too short: {0} bytes")]
    TruncatedCiphertext(usize),
}

/// Datagram cipher keyed by the tunnel's shared passphrase.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; 32],
}

impl Cipher {
    /// Derive the sealing key from the shared passphrase using BLAKE3.
    pub fn new(passphrase: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"burrow-datagram-key-v1:");
        hasher.update(passphrase.as_bytes());
        Self {
            key: *hasher.finalize().as_bytes(),
        }
    }

    /// Short key fingerprint for startup logs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"burrow-key-fingerprint-v1:");
        hasher.update(&self.key);
        hex::encode(&hasher.finalize().as_bytes()[..4])
    }

    /// Seal a plaintext. Output layout: nonce || ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed datagram. Corrupt, foreign, and truncated inputs all
    /// fail distinguishably from a zero-length success.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN {
            return Err(CipherError::TruncatedCiphertext(sealed.len()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| CipherError::DecryptionFailed)?;
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::DecryptionFailed)
    }
}
