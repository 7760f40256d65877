//! Frame buffer ownership and the drawing sink behind it.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use crate::frame::FrameBuffer;

/// Anything that can put a complete frame on the LEDs
pub trait RenderSink: Send {
    /// Push the full frame. Implementations are expected to double-buffer on
    /// their side; the frame is mutated again as soon as this returns.
    fn draw(&mut self, frame: &FrameBuffer) -> Result<()>;

    /// Called once on shutdown
    fn blackout(&mut self, frame: &FrameBuffer) -> Result<()> {
        let mut black = frame.clone();
        black.fill(0);
        self.draw(&black)
    }
}

/// Sink with no hardware behind it
#[derive(Debug, Default)]
pub struct NullSink {
    draws: u64,
}

impl RenderSink for NullSink {
    fn draw(&mut self, frame: &FrameBuffer) -> Result<()> {
        self.draws += 1;
        log::trace!("draw #{} ({} pixels)", self.draws, frame.len());
        Ok(())
    }
}

/// The frame buffer together with the sink that displays it
pub struct Renderer {
    frame: FrameBuffer,
    sink: Box<dyn RenderSink>,
}

/// Renderer shared between receive loops. Holding the lock covers one
/// assemble + draw, so at most one draw is ever in flight.
pub type SharedRenderer = Arc<Mutex<Renderer>>;

impl Renderer {
    pub fn new(strip_count: usize, led_count: usize, sink: Box<dyn RenderSink>) -> Self {
        Renderer {
            frame: FrameBuffer::new(strip_count, led_count),
            sink,
        }
    }

    pub fn shared(self) -> SharedRenderer {
        Arc::new(Mutex::new(self))
    }

    #[cfg(test)]
    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut FrameBuffer {
        &mut self.frame
    }

    /// Fill every channel with `value` and show it
    pub fn lamp_test(&mut self, value: u8) -> Result<()> {
        self.frame.fill(value);
        self.draw()
    }

    pub fn draw(&mut self) -> Result<()> {
        self.sink.draw(&self.frame)
    }

    pub fn blackout(&mut self) -> Result<()> {
        self.sink.blackout(&self.frame)
    }
}

/// Lock the shared renderer, recovering the guard if another loop panicked
/// while holding it.
pub fn lock(renderer: &SharedRenderer) -> MutexGuard<'_, Renderer> {
    renderer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
