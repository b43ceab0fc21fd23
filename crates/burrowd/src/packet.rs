//! Outer packet codec
//!
//! Every IP packet crossing the tunnel is wrapped in a small frame before
//! sealing, so the receiving side can tell a well-formed relay payload from
//! stray decrypted bytes.
//!
//! Wire format:
//! - 2 bytes: magic
//! - 2 bytes: data length (big-endian)
//! - N bytes: data

use bytes::{BufMut, BytesMut};
use thiserror::Error;

const MAGIC: [u8; 2] = [0xB7, 0x01];
const HEADER_LEN: usize = 4;

/// Largest data field a frame may carry.
pub const MAX_DATA: usize = u16::MAX as usize;

/// Packet framing errors
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("Packet too large: {0} bytes (max {MAX_DATA})")]
    TooLarge(usize),
    #[error("Packet truncated: {0} bytes")]
    Truncated(usize),
    #[error("Bad packet magic")]
    BadMagic,
    #[error("Length mismatch: header says {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Wrap raw IP bytes for transport.
pub fn serialize(data: &[u8]) -> Result<Vec<u8>, PacketError> {
    if data.len() > MAX_DATA {
        return Err(PacketError::TooLarge(data.len()));
    }
    let mut frame = BytesMut::with_capacity(HEADER_LEN + data.len());
    frame.put_slice(&MAGIC);
    frame.put_u16(data.len() as u16);
    frame.put_slice(data);
    Ok(frame.to_vec())
}

/// Unwrap a transported frame back into raw IP bytes.
pub fn parse(frame: &[u8]) -> Result<Vec<u8>, PacketError> {
    if frame.len() < HEADER_LEN {
        return Err(PacketError::Truncated(frame.len()));
    }
    if frame[..2] != MAGIC {
        return Err(PacketError::BadMagic);
    }

    let expected = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    let data = &frame[HEADER_LEN..];
    if data.len() != expected {
        return Err(PacketError::LengthMismatch {
            expected,
            actual: data.len(),
        });
    }
    Ok(data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let frame = serialize(b"raw ip bytes").unwrap();
        assert_eq!(parse(&frame).unwrap(), b"raw ip bytes");
    }

    #[test]
    fn test_empty_data_roundtrip() {
        let frame = serialize(b"").unwrap();
        assert_eq!(frame.len(), HEADER_LEN);
        assert_eq!(parse(&frame).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_truncated_frame_rejected() {
        assert!(matches!(parse(&[0xB7]), Err(PacketError::Truncated(1))));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut frame = serialize(b"data").unwrap();
        frame[0] = 0x00;
        assert!(matches!(parse(&frame), Err(PacketError::BadMagic)));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut frame = serialize(b"data").unwrap();
        frame.pop();
        assert!(matches!(
            parse(&frame),
            Err(PacketError::LengthMismatch { expected: 4, actual: 3 })
        ));
    }
}
