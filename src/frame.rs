/// One RGB LED value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Pixel {
    pub const BLACK: Pixel = Pixel { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Pixel { r, g, b }
    }

    /// Build a pixel from the first three bytes of an RGB triplet
    pub fn from_rgb(bytes: &[u8]) -> Self {
        Pixel::new(bytes[0], bytes[1], bytes[2])
    }
}

/// Addressable grid of pixels spread over a fixed number of strips
///
/// Pixels are stored strip-major: strip `s`, offset `o` lives at
/// `s * led_count + o`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    strip_count: usize,
    led_count: usize,
    pixels: Vec<Pixel>,
}

impl FrameBuffer {
    pub fn new(strip_count: usize, led_count: usize) -> Self {
        FrameBuffer {
            strip_count,
            led_count,
            pixels: vec![Pixel::BLACK; strip_count * led_count],
        }
    }

    pub fn strip_count(&self) -> usize {
        self.strip_count
    }

    /// LEDs per strip
    pub fn led_count(&self) -> usize {
        self.led_count
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Overwrite one pixel. Returns false and leaves the buffer untouched if
    /// the address is outside the configured layout.
    pub fn set(&mut self, strip: usize, offset: usize, pixel: Pixel) -> bool {
        if strip >= self.strip_count || offset >= self.led_count {
            return false;
        }
        self.pixels[strip * self.led_count + offset] = pixel;
        true
    }

    #[cfg(test)]
    pub fn get(&self, strip: usize, offset: usize) -> Option<Pixel> {
        if strip >= self.strip_count || offset >= self.led_count {
            return None;
        }
        Some(self.pixels[strip * self.led_count + offset])
    }

    pub fn strip(&self, strip: usize) -> Option<&[Pixel]> {
        if strip >= self.strip_count {
            return None;
        }
        let start = strip * self.led_count;
        Some(&self.pixels[start..start + self.led_count])
    }

    /// Set every channel of every pixel to `value` (lamp test)
    pub fn fill(&mut self, value: u8) {
        self.pixels.fill(Pixel::new(value, value, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_black() {
        let frame = FrameBuffer::new(4, 64);
        assert_eq!(frame.len(), 256);
        assert_eq!(frame.get(3, 63), Some(Pixel::BLACK));
    }

    #[test]
    fn test_set_out_of_range_is_dropped() {
        let mut frame = FrameBuffer::new(2, 4);
        let before = frame.clone();
        assert!(!frame.set(2, 0, Pixel::new(1, 2, 3)));
        assert!(!frame.set(0, 4, Pixel::new(1, 2, 3)));
        assert_eq!(frame, before);
    }

    #[test]
    fn test_fill_lamp_test() {
        let mut frame = FrameBuffer::new(2, 3);
        frame.fill(128);
        assert!(frame.strip(1).unwrap().iter().all(|p| *p == Pixel::new(128, 128, 128)));
    }

    #[test]
    fn test_strip_view() {
        let mut frame = FrameBuffer::new(2, 2);
        frame.set(1, 1, Pixel::new(9, 8, 7));
        assert_eq!(frame.strip(1), Some(&[Pixel::BLACK, Pixel::new(9, 8, 7)][..]));
        assert!(frame.strip(2).is_none());
    }
}
