//! Datagram envelope: freshness timestamp plus payload
//!
//! Wire layout (before sealing): an 8-byte little-endian IEEE-754 double
//! holding seconds since the Unix epoch, followed by the raw payload. The
//! timestamp is a freshness watermark only; it never drives reordering or
//! deduplication.

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Size of the timestamp header in bytes.
pub const TIMESTAMP_LEN: usize = 8;

/// Envelope errors
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Envelope body too short: {0} bytes (need {TIMESTAMP_LEN})")]
    TooShort(usize),
}

/// Current wall-clock time as fractional seconds since the epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Prepend `timestamp` to `payload`.
pub fn encode(timestamp: f64, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(TIMESTAMP_LEN + payload.len());
    body.extend_from_slice(&timestamp.to_le_bytes());
    body.extend_from_slice(payload);
    body
}

/// Split a decrypted body into its timestamp and payload.
pub fn decode(body: &[u8]) -> Result<(f64, &[u8]), EnvelopeError> {
    if body.len() < TIMESTAMP_LEN {
        return Err(EnvelopeError::TooShort(body.len()));
    }
    let mut header = [0u8; TIMESTAMP_LEN];
    header.copy_from_slice(&body[..TIMESTAMP_LEN]);
    Ok((f64::from_le_bytes(header), &body[TIMESTAMP_LEN..]))
}
