//! Serial framing understood by USB LED controllers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialProtocol {
    /// `Ada` + count + checksum, as spoken by Adalight sketches
    Adalight,
    /// HyperSerial `Awa` framing with a Fletcher trailer
    #[default]
    Awa,
}

impl SerialProtocol {
    pub fn frame(self, data: &[u8], stride: usize) -> Vec<u8> {
        match self {
            SerialProtocol::Adalight => adalight_frame(data, stride),
            SerialProtocol::Awa => awa_frame(data, stride),
        }
    }
}

fn adalight_frame(data: &[u8], stride: usize) -> Vec<u8> {
    let [count_hi, count_lo] = ((data.len() / stride) as u16).to_be_bytes();

    let mut frame = Vec::with_capacity(6 + data.len());
    frame.extend_from_slice(b"Ada");
    frame.extend_from_slice(&[count_hi, count_lo, count_hi ^ count_lo ^ 0x55]);
    frame.extend_from_slice(data);
    frame
}

fn awa_frame(data: &[u8], stride: usize) -> Vec<u8> {
    // Count is sent minus one
    let last = (data.len() / stride).saturating_sub(1) as u16;
    let [count_hi, count_lo] = last.to_be_bytes();

    let mut frame = Vec::with_capacity(6 + data.len() + 3);
    frame.extend_from_slice(b"Awa");
    frame.extend_from_slice(&[count_hi, count_lo, count_hi ^ count_lo ^ 0x55]);
    frame.extend_from_slice(data);

    let mut fletcher1: u16 = 0;
    let mut fletcher2: u16 = 0;
    let mut fletcher_ext: u16 = 0;
    for (position, &byte) in data.iter().enumerate() {
        fletcher1 = (fletcher1 + u16::from(byte)) % 255;
        fletcher2 = (fletcher2 + fletcher1) % 255;
        fletcher_ext = (fletcher_ext + (u16::from(byte) ^ position as u16)) % 255;
    }
    // 'A' would look like the start of the next header
    if fletcher_ext == 0x41 {
        fletcher_ext = 0xaa;
    }
    frame.extend_from_slice(&[fletcher1 as u8, fletcher2 as u8, fletcher_ext as u8]);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adalight_header() {
        let frame = SerialProtocol::Adalight.frame(&[0u8; 300 * 3], 3);
        assert_eq!(&frame[..6], &[b'A', b'd', b'a', 0x01, 0x2c, 0x01 ^ 0x2c ^ 0x55]);
        assert_eq!(frame.len(), 6 + 900);
    }

    #[test]
    fn test_awa_header_and_trailer() {
        let frame = SerialProtocol::Awa.frame(&[1, 2, 3, 4, 5, 6], 3);
        assert_eq!(&frame[..6], &[b'A', b'w', b'a', 0, 1, 1 ^ 0x55]);
        // fletcher1 = 21, fletcher2 = 1+3+6+10+15+21 = 56
        assert_eq!(frame[12], 21);
        assert_eq!(frame[13], 56);
        assert_eq!(frame.len(), 6 + 6 + 3);
    }

    #[test]
    fn test_awa_empty_strip() {
        let frame = SerialProtocol::Awa.frame(&[], 3);
        assert_eq!(&frame[3..6], &[0, 0, 0x55]);
    }
}
