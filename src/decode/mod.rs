//! Pixel protocol decoding.
//!
//! Each protocol turns raw bytes into a [`DecodedPacket`]: a logical base
//! address plus an ordered run of pixels. Decoders are pure and do no I/O;
//! `source` owns the reading policy for each transport.

pub mod e131;
pub mod opc;

use thiserror::Error;

use crate::frame::Pixel;

/// Largest datagram or OPC payload we ever buffer
pub const RECV_BUFFER_SIZE: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    E131,
    Opc,
}

/// One packet's worth of pixel writes. Built per packet and dropped once
/// assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub protocol: Protocol,
    /// Universe (E1.31) or channel (OPC); first strip this packet writes to
    pub base: usize,
    pub pixels: Vec<Pixel>,
    /// Payload length the header announced, in bytes
    pub declared_len: usize,
}

impl DecodedPacket {
    pub(crate) fn from_payload(protocol: Protocol, base: usize, declared_len: usize, payload: &[u8]) -> Self {
        DecodedPacket {
            protocol,
            base,
            pixels: payload.chunks_exact(3).map(Pixel::from_rgb).collect(),
            declared_len,
        }
    }
}

/// Per-packet decode failures. None of these stop a receive loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("not an E1.17 packet")]
    NotRecognized,
    #[error("packet too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("ignoring command {command} on channel {channel}")]
    IgnoredCommand { channel: u8, command: u8 },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{image_bytes} byte image too large for the {capacity} byte receive buffer")]
pub struct BufferTooSmall {
    pub image_bytes: usize,
    pub capacity: usize,
}

/// Refuse layouts whose per-strip image would not fit the receive buffer
/// alongside a start code.
pub fn check_capacity(led_count: usize) -> Result<(), BufferTooSmall> {
    let too_small = |image_bytes| BufferTooSmall {
        image_bytes,
        capacity: RECV_BUFFER_SIZE,
    };
    // Saturate so an absurd count still reports as oversized
    let image_bytes = led_count.checked_mul(3).ok_or(too_small(usize::MAX))?;
    if image_bytes >= RECV_BUFFER_SIZE {
        return Err(too_small(image_bytes));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_bytes_ignored() {
        let packet = DecodedPacket::from_payload(Protocol::Opc, 0, 5, &[1, 2, 3, 4, 5]);
        assert_eq!(packet.pixels, vec![Pixel::new(1, 2, 3)]);
    }

    #[test]
    fn test_check_capacity() {
        assert!(check_capacity(64).is_ok());
        assert!(check_capacity(21845).is_ok());
        let err = check_capacity(21846).unwrap_err();
        assert_eq!(err.image_bytes, 65538);
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_check_capacity_overflowing_count() {
        let err = check_capacity(usize::MAX / 3 + 1).unwrap_err();
        assert_eq!(err.image_bytes, usize::MAX);
        assert!(check_capacity(usize::MAX).is_err());
    }
}
