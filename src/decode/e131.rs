//! E1.31 (sACN) data packets.
//!
//! Only the fields needed to place pixels are read: the `E1.17` marker inside
//! the ACN packet identifier, the universe, and the DMP property value count.
//! Everything else in the root, framing and DMP layers is taken on trust.

use super::{DecodeError, DecodedPacket, Protocol};

/// Offsets of `E`, `1`, `1`, `7` within `ASC-E1.17`
pub const SIGNATURE: [(usize, u8); 4] = [(8, b'E'), (9, b'1'), (11, b'1'), (12, b'7')];
pub const UNIVERSE_RANGE: std::ops::Range<usize> = 113..115;
pub const PROPERTY_COUNT_RANGE: std::ops::Range<usize> = 123..125;
pub const DMX_DATA_OFFSET: usize = 126;

fn has_signature(datagram: &[u8]) -> bool {
    SIGNATURE
        .iter()
        .all(|&(offset, expected)| datagram.get(offset) == Some(&expected))
}

fn read_u16_be(datagram: &[u8], range: std::ops::Range<usize>) -> u16 {
    u16::from_be_bytes([datagram[range.start], datagram[range.start + 1]])
}

/// Decode one complete UDP datagram
pub fn decode(datagram: &[u8]) -> Result<DecodedPacket, DecodeError> {
    if !has_signature(datagram) {
        return Err(DecodeError::NotRecognized);
    }
    if datagram.len() < DMX_DATA_OFFSET {
        return Err(DecodeError::TooShort {
            needed: DMX_DATA_OFFSET,
            actual: datagram.len(),
        });
    }

    let universe = read_u16_be(datagram, UNIVERSE_RANGE);
    // The property count includes the start code slot
    let declared_len = usize::from(read_u16_be(datagram, PROPERTY_COUNT_RANGE)).saturating_sub(1);

    let end = (DMX_DATA_OFFSET + declared_len).min(datagram.len());
    Ok(DecodedPacket::from_payload(
        Protocol::E131,
        usize::from(universe),
        declared_len,
        &datagram[DMX_DATA_OFFSET..end],
    ))
}

/// Build a minimal E1.31 data packet
#[cfg(test)]
pub fn encode(universe: u16, data: &[u8]) -> Vec<u8> {
    let mut packet = vec![0u8; DMX_DATA_OFFSET + data.len()];
    packet[0..2].copy_from_slice(&0x0010u16.to_be_bytes());
    packet[4..16].copy_from_slice(b"ASC-E1.17\0\0\0");
    packet[UNIVERSE_RANGE].copy_from_slice(&universe.to_be_bytes());
    let count = (data.len() + 1) as u16;
    packet[PROPERTY_COUNT_RANGE].copy_from_slice(&count.to_be_bytes());
    // Start code 0 (dimmer data) is already in place
    packet[DMX_DATA_OFFSET..].copy_from_slice(data);
    packet
}
