use crate::decode::DecodedPacket;
use crate::frame::FrameBuffer;

/// Resolve logical pixel `index` under `base` to a physical (strip, offset).
///
/// Indices past the end of a strip continue on the next strip, so one packet
/// can cover several strips.
pub fn resolve(base: usize, index: usize, led_count: usize) -> (usize, usize) {
    (base + index / led_count, index % led_count)
}

/// Write every pixel of `packet` into `frame`, last write wins.
///
/// Addresses that land outside the frame are skipped. Returns the number of
/// pixels actually written.
pub fn apply(frame: &mut FrameBuffer, packet: &DecodedPacket) -> usize {
    let led_count = frame.led_count();
    if led_count == 0 {
        return 0;
    }

    let mut written = 0;
    for (i, pixel) in packet.pixels.iter().enumerate() {
        let (strip, offset) = resolve(packet.base, i, led_count);
        if strip >= frame.strip_count() {
            // Every later index resolves further out
            break;
        }
        if frame.set(strip, offset, *pixel) {
            written += 1;
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{opc, Protocol};
    use crate::frame::Pixel;

    fn packet(base: usize, pixels: Vec<Pixel>) -> DecodedPacket {
        DecodedPacket {
            protocol: Protocol::Opc,
            base,
            declared_len: pixels.len() * 3,
            pixels,
        }
    }

    #[test]
    fn test_wrap_across_strips() {
        assert_eq!(resolve(0, 70, 64), (1, 6));

        let mut frame = FrameBuffer::new(4, 64);
        let mut pixels = vec![Pixel::BLACK; 71];
        pixels[70] = Pixel::new(1, 2, 3);
        assert_eq!(apply(&mut frame, &packet(0, pixels)), 71);
        assert_eq!(frame.get(1, 6), Some(Pixel::new(1, 2, 3)));
    }

    #[test]
    fn test_out_of_range_dropped() {
        let mut frame = FrameBuffer::new(2, 4);
        frame.set(1, 3, Pixel::new(5, 5, 5));
        let before = frame.clone();

        assert_eq!(apply(&mut frame, &packet(2, vec![Pixel::new(9, 9, 9); 4])), 0);
        assert_eq!(frame, before);

        // Spills past the last strip: in-range part written, rest dropped
        let written = apply(&mut frame, &packet(1, vec![Pixel::new(7, 7, 7); 6]));
        assert_eq!(written, 4);
        assert_eq!(frame.get(0, 0), Some(Pixel::BLACK));
        assert_eq!(frame.get(1, 3), Some(Pixel::new(7, 7, 7)));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let decoded = opc::decode(&opc::encode(1, 0, &[10, 20, 30, 40, 50, 60])).unwrap();
        let mut once = FrameBuffer::new(4, 8);
        apply(&mut once, &decoded);
        let mut twice = once.clone();
        apply(&mut twice, &decoded);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_scenario_three_primaries() {
        let message = [0, 0, 0, 9, 255, 0, 0, 0, 255, 0, 0, 0, 255];
        let mut frame = FrameBuffer::new(8, 64);
        apply(&mut frame, &opc::decode(&message).unwrap());
        assert_eq!(frame.get(0, 0), Some(Pixel::new(255, 0, 0)));
        assert_eq!(frame.get(0, 1), Some(Pixel::new(0, 255, 0)));
        assert_eq!(frame.get(0, 2), Some(Pixel::new(0, 0, 255)));
        assert_eq!(frame.get(0, 3), Some(Pixel::BLACK));
    }
}
