//! Open Pixel Control messages.
//!
//! Wire format: `channel`, `command`, `len_hi`, `len_lo`, then
//! `len_hi << 8 | len_lo` payload bytes. Command 0 sets pixels; any other
//! command is ignored.

use super::{DecodeError, DecodedPacket, Protocol};

pub const HEADER_LEN: usize = 4;
pub const CMD_SET_PIXELS: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcHeader {
    pub channel: u8,
    pub command: u8,
    /// Payload bytes that follow the header
    pub len: usize,
}

impl OpcHeader {
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Self {
        OpcHeader {
            channel: bytes[0],
            command: bytes[1],
            len: usize::from(u16::from_be_bytes([bytes[2], bytes[3]])),
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let [hi, lo] = (self.len as u16).to_be_bytes();
        [self.channel, self.command, hi, lo]
    }
}

/// Decode a header and the payload that was read for it. The payload may be
/// shorter than announced if the stream ended early.
pub fn decode_parts(header: OpcHeader, payload: &[u8]) -> Result<DecodedPacket, DecodeError> {
    if header.command != CMD_SET_PIXELS {
        return Err(DecodeError::IgnoredCommand {
            channel: header.channel,
            command: header.command,
        });
    }
    let payload = &payload[..payload.len().min(header.len)];
    Ok(DecodedPacket::from_payload(
        Protocol::Opc,
        usize::from(header.channel),
        header.len,
        payload,
    ))
}

/// Decode one whole message held in memory
#[cfg(test)]
pub fn decode(message: &[u8]) -> Result<DecodedPacket, DecodeError> {
    let header: [u8; HEADER_LEN] = message
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(DecodeError::TooShort {
            needed: HEADER_LEN,
            actual: message.len(),
        })?;
    decode_parts(OpcHeader::parse(header), &message[HEADER_LEN..])
}

/// Encode a message. Payloads longer than 65535 bytes are truncated.
#[cfg(test)]
pub fn encode(channel: u8, command: u8, payload: &[u8]) -> Vec<u8> {
    let payload = &payload[..payload.len().min(usize::from(u16::MAX))];
    let header = OpcHeader {
        channel,
        command,
        len: payload.len(),
    };
    let mut message = Vec::with_capacity(HEADER_LEN + payload.len());
    message.extend_from_slice(&header.to_bytes());
    message.extend_from_slice(payload);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Pixel;

    #[test]
    fn test_decode_set_pixels() {
        let message = [0, 0, 0, 9, 255, 0, 0, 0, 255, 0, 0, 0, 255];
        let decoded = decode(&message).unwrap();
        assert_eq!(decoded.base, 0);
        assert_eq!(decoded.declared_len, 9);
        assert_eq!(
            decoded.pixels,
            vec![Pixel::new(255, 0, 0), Pixel::new(0, 255, 0), Pixel::new(0, 0, 255)]
        );
    }

    #[test]
    fn test_non_pixel_command_ignored() {
        let message = [3, 1, 0, 3, 1, 2, 3];
        assert_eq!(
            decode(&message),
            Err(DecodeError::IgnoredCommand { channel: 3, command: 1 })
        );
    }

    #[test]
    fn test_pixel_count_is_len_div_3() {
        for len in 0..12usize {
            let payload: Vec<u8> = (0..len as u8).collect();
            let decoded = decode(&encode(0, 0, &payload)).unwrap();
            assert_eq!(decoded.pixels.len(), len / 3);
        }
    }

    #[test]
    fn test_short_payload_uses_what_arrived() {
        let header = OpcHeader { channel: 1, command: 0, len: 300 };
        let decoded = decode_parts(header, &[1, 2, 3, 4]).unwrap();
        assert_eq!(decoded.declared_len, 300);
        assert_eq!(decoded.pixels, vec![Pixel::new(1, 2, 3)]);
    }

    #[test]
    fn test_header_roundtrip_bytes() {
        let header = OpcHeader::parse([7, 0, 0x01, 0x2c]);
        assert_eq!(header.len, 300);
        assert_eq!(header.to_bytes(), [7, 0, 0x01, 0x2c]);
    }

    #[test]
    fn test_decode_missing_header() {
        assert_eq!(decode(&[0, 0]), Err(DecodeError::TooShort { needed: 4, actual: 2 }));
    }
}
