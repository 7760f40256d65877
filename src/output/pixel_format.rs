use serde::{Deserialize, Serialize};

use crate::frame::Pixel;

/// Channel order expected by the LED controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    #[default]
    Rgb,
    Grb,
    Bgr,
    Rgbw,
    Grbw,
}

impl PixelFormat {
    /// Bytes per pixel on the wire
    pub fn stride(self) -> usize {
        match self {
            PixelFormat::Rgbw | PixelFormat::Grbw => 4,
            _ => 3,
        }
    }

    /// Encode a strip into controller byte order
    pub fn encode(self, pixels: &[Pixel]) -> Vec<u8> {
        let mut out = Vec::with_capacity(pixels.len() * self.stride());
        for &Pixel { r, g, b } in pixels {
            match self {
                PixelFormat::Rgb => out.extend_from_slice(&[r, g, b]),
                PixelFormat::Grb => out.extend_from_slice(&[g, r, b]),
                PixelFormat::Bgr => out.extend_from_slice(&[b, g, r]),
                // White channel takes the common part of RGB
                PixelFormat::Rgbw => {
                    let w = r.min(g).min(b);
                    out.extend_from_slice(&[r - w, g - w, b - w, w]);
                }
                PixelFormat::Grbw => {
                    let w = r.min(g).min(b);
                    out.extend_from_slice(&[g - w, r - w, b - w, w]);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Pixel = Pixel::new(255, 0, 0);

    #[test]
    fn test_rgb_passthrough() {
        let pixels = [RED, Pixel::new(0, 255, 0), Pixel::new(0, 0, 255)];
        assert_eq!(PixelFormat::Rgb.encode(&pixels), vec![255, 0, 0, 0, 255, 0, 0, 0, 255]);
    }

    #[test]
    fn test_grb_and_bgr() {
        assert_eq!(PixelFormat::Grb.encode(&[RED]), vec![0, 255, 0]);
        assert_eq!(PixelFormat::Bgr.encode(&[RED]), vec![0, 0, 255]);
    }

    #[test]
    fn test_white_extraction() {
        assert_eq!(PixelFormat::Rgbw.encode(&[Pixel::new(255, 255, 255)]), vec![0, 0, 0, 255]);
        assert_eq!(PixelFormat::Rgbw.encode(&[Pixel::new(255, 128, 128)]), vec![127, 0, 0, 128]);
        assert_eq!(PixelFormat::Grbw.encode(&[RED]), vec![0, 255, 0, 0]);
    }

    #[test]
    fn test_deserialize_names() {
        let format: PixelFormat = serde_json::from_str("\"GRBW\"").unwrap();
        assert_eq!(format, PixelFormat::Grbw);
        assert_eq!(format.stride(), 4);
    }
}
