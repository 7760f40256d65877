//! The receive → decode → assemble → draw → throttle → report loop.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::decode::DecodeError;
use crate::record::PacketTap;
use crate::render::{self, SharedRenderer};
use crate::source::PacketSource;
use crate::stats::StatsReporter;

/// Processing cost not covered by the measured latency, as measured on a
/// BeagleBone Black
pub const DEFAULT_OVERHEAD: Duration = Duration::from_micros(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Receiving,
    Assembling,
    Drawing,
    Throttling,
    Reporting,
}

/// Time left in this frame slot at `frame_rate`, clamped at zero
pub fn pace(elapsed: Duration, frame_rate: u32, overhead: Duration) -> Duration {
    if frame_rate == 0 {
        return Duration::ZERO;
    }
    let slot = Duration::from_micros(1_000_000 / u64::from(frame_rate));
    slot.saturating_sub(elapsed).saturating_sub(overhead)
}

/// Waits out the remainder of a frame slot
pub trait Throttle: Send {
    fn wait(&mut self, elapsed: Duration);
}

/// Coarse sleep-based throttle
pub struct SleepThrottle {
    frame_rate: u32,
    overhead: Duration,
}

impl SleepThrottle {
    pub fn new(frame_rate: u32, overhead: Duration) -> Self {
        SleepThrottle { frame_rate, overhead }
    }
}

impl Throttle for SleepThrottle {
    fn wait(&mut self, elapsed: Duration) {
        let delay = pace(elapsed, self.frame_rate, self.overhead);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// What a finished loop did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub frames: u64,
    pub skipped: u64,
    pub bytes: u64,
}

pub struct PacingLoop<S> {
    source: S,
    renderer: SharedRenderer,
    throttle: Option<Box<dyn Throttle>>,
    taps: Vec<Box<dyn PacketTap>>,
    stats: StatsReporter,
    running: Arc<AtomicBool>,
    state: LoopState,
    report: LoopReport,
}

impl<S: PacketSource> PacingLoop<S> {
    pub fn new(source: S, renderer: SharedRenderer, stats: StatsReporter, running: Arc<AtomicBool>) -> Self {
        PacingLoop {
            source,
            renderer,
            throttle: None,
            taps: Vec::new(),
            stats,
            running,
            state: LoopState::Idle,
            report: LoopReport::default(),
        }
    }

    /// Throttle applied after each draw. Only paced sources use it.
    pub fn with_throttle(mut self, throttle: Box<dyn Throttle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn with_tap(mut self, tap: Box<dyn PacketTap>) -> Self {
        self.taps.push(tap);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> LoopState {
        self.state
    }

    fn enter(&mut self, next: LoopState) {
        log::trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run until the source ends or shutdown is requested. An `Err` is an
    /// I/O failure of this source only.
    pub fn run(&mut self) -> io::Result<LoopReport> {
        while self.running.load(Ordering::Relaxed) {
            if !self.step()? {
                break;
            }
        }
        self.enter(LoopState::Idle);
        Ok(self.report)
    }

    /// One full packet cycle. Returns false once the source is finished.
    pub fn step(&mut self) -> io::Result<bool> {
        self.enter(LoopState::Receiving);
        let received = match self.source.receive()? {
            Some(received) => received,
            None => return Ok(false),
        };
        self.report.bytes += received.raw.len() as u64;

        // Bad or ignored packets go straight back to receiving
        let packet = match received.decoded {
            Ok(packet) => packet,
            Err(err) => {
                match err {
                    DecodeError::IgnoredCommand { .. } => log::debug!("{}", err),
                    _ => log::warn!("dropping packet: {}", err),
                }
                self.report.skipped += 1;
                self.enter(LoopState::Idle);
                return Ok(true);
            }
        };
        log::debug!(
            "received {} bytes for base {} ({} pixels)",
            packet.declared_len,
            packet.base,
            packet.pixels.len()
        );

        // Assemble and draw under one lock so clients never interleave
        self.enter(LoopState::Assembling);
        {
            let shared = Arc::clone(&self.renderer);
            let mut renderer = render::lock(&shared);
            let written = crate::assembler::apply(renderer.frame_mut(), &packet);
            if written < packet.pixels.len() {
                log::debug!("{} pixels fell outside the frame", packet.pixels.len() - written);
            }
            self.enter(LoopState::Drawing);
            if let Err(e) = renderer.draw() {
                log::warn!("draw failed: {:#}", e);
            }
        }
        // Recorder and forwarder see the packet exactly as received
        for tap in &mut self.taps {
            tap.packet(&received.raw, &packet)?;
        }

        // Live sources set their own pace
        let elapsed = received.started.elapsed();
        if self.source.is_paced() {
            if let Some(mut throttle) = self.throttle.take() {
                self.enter(LoopState::Throttling);
                throttle.wait(elapsed);
                self.throttle = Some(throttle);
            }
        }

        // Periodic report
        self.report.frames += 1;
        self.stats.record(elapsed.as_micros() as u64);
        if let Some(summary) = self.stats.flush_if_due(Instant::now()) {
            self.enter(LoopState::Reporting);
            log::info!("{}", summary);
        }

        self.enter(LoopState::Idle);
        Ok(true)
    }
}
