//! Serial LED controllers as a render sink.
//!
//! Each configured output shows one strip of the frame buffer. Writing to the
//! port happens on a worker thread behind a one-slot channel: if the worker is
//! still busy with the previous frame, the new one is dropped, so a slow port
//! never stalls the receive loop.

pub mod framing;
pub mod pixel_format;

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serialport::SerialPort;

use crate::config::OutputConfig;
use crate::frame::FrameBuffer;
use crate::render::RenderSink;

/// One serial port with its worker thread
pub struct SerialOutput {
    config: OutputConfig,
    sender: Option<SyncSender<Vec<u8>>>,
    frames_sent: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    worker_handle: Option<thread::JoinHandle<()>>,
}

impl SerialOutput {
    pub fn open(config: OutputConfig, led_count: usize) -> Result<Self> {
        let port = open_port(&config)?;

        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(1);
        let frames_sent = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let worker_config = config.clone();
        let worker_frames_sent = Arc::clone(&frames_sent);
        let worker_running = Arc::clone(&running);
        let worker_handle = thread::spawn(move || {
            worker_thread(port, receiver, worker_config, led_count, worker_frames_sent, worker_running);
        });

        log::info!(
            "Opened {} (strip {}, {:?} @ {} baud, {:?})",
            config.port,
            config.strip,
            config.protocol,
            config.baud_rate,
            config.pixel_format
        );

        Ok(SerialOutput {
            config,
            sender: Some(sender),
            frames_sent,
            running,
            worker_handle: Some(worker_handle),
        })
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Queue a strip for sending; dropped if the worker is still busy
    pub fn send_frame(&self, strip: Vec<u8>) {
        if let Some(sender) = &self.sender {
            match sender.try_send(strip) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => {
                    log::trace!("{} is disconnected, frame dropped", self.config.port);
                }
            }
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        // Closing the channel wakes the worker immediately
        self.sender.take();
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SerialOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_port(config: &OutputConfig) -> Result<Box<dyn SerialPort>> {
    let mut port = serialport::new(&config.port, config.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open()
        .with_context(|| format!("Failed to open serial port {}", config.port))?;

    port.set_timeout(Duration::from_millis(1000))
        .context("Failed to set serial port timeout")?;

    if let Err(e) = port.write_data_terminal_ready(true) {
        log::warn!("Failed to set DTR on {}: {}", config.port, e);
    }

    // Let the controller reset after DTR
    thread::sleep(Duration::from_millis(100));

    Ok(port)
}

fn worker_thread<W: Write>(
    mut port: W,
    receiver: Receiver<Vec<u8>>,
    config: OutputConfig,
    led_count: usize,
    frames_sent: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
) {
    let stride = config.pixel_format.stride();

    // Main loop: frame and write whatever the sink queued
    while running.load(Ordering::Relaxed) {
        let data = match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(data) => data,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let frame = config.protocol.frame(&data, stride);
        log::trace!("{}: sending {} bytes ({} pixels)", config.port, frame.len(), data.len() / stride);

        if let Err(e) = port.write_all(&frame).and_then(|_| port.flush()) {
            log::error!("Serial error on {}: {}", config.port, e);
            log::error!("Output {} is now disconnected", config.port);
            break;
        }
        frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    // Best effort: leave the strip dark, even after a write error
    let blank = config.pixel_format.encode(&vec![crate::frame::Pixel::BLACK; led_count]);
    let frame = config.protocol.frame(&blank, stride);
    let _ = port.write_all(&frame);
    let _ = port.flush();
}

/// All configured serial outputs, fed from one frame buffer
pub struct SerialOutputs {
    outputs: Vec<SerialOutput>,
}

impl SerialOutputs {
    /// Open every configured port. Ports that fail are reported and skipped;
    /// having none left is an error.
    pub fn open(configs: &[OutputConfig], led_count: usize) -> Result<Self> {
        let mut outputs = Vec::new();
        for config in configs {
            match SerialOutput::open(config.clone(), led_count) {
                Ok(output) => outputs.push(output),
                Err(e) => log::error!("Failed to open {}: {:#}", config.port, e),
            }
        }
        if outputs.is_empty() {
            anyhow::bail!("No outputs could be opened");
        }
        Ok(SerialOutputs { outputs })
    }

    pub fn frames_sent(&self) -> Vec<(String, u64)> {
        self.outputs
            .iter()
            .map(|o| (o.config().port.clone(), o.frames_sent()))
            .collect()
    }
}

impl RenderSink for SerialOutputs {
    fn draw(&mut self, frame: &FrameBuffer) -> Result<()> {
        for output in &self.outputs {
            let config = output.config();
            let Some(strip) = frame.strip(config.strip) else {
                continue;
            };
            output.send_frame(config.pixel_format.encode(strip));
        }
        Ok(())
    }

    fn blackout(&mut self, frame: &FrameBuffer) -> Result<()> {
        log::info!("Turning off LEDs...");
        let mut black = frame.clone();
        black.fill(0);
        self.draw(&black)?;
        // Give the workers time to push the black frames out
        thread::sleep(Duration::from_millis(100));
        for (port, sent) in self.frames_sent() {
            log::debug!("{}: {} frames sent", port, sent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::framing::SerialProtocol;
    use crate::output::pixel_format::PixelFormat;
    use std::io;
    use std::sync::Mutex;

    /// Fails the first write, then records everything
    struct FlakyPort {
        failed: bool,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for FlakyPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_serial_error_still_blanks_strip() {
        let config = OutputConfig {
            port: "flaky".into(),
            protocol: SerialProtocol::Adalight,
            baud_rate: 115200,
            strip: 0,
            pixel_format: PixelFormat::Rgb,
        };
        let written = Arc::new(Mutex::new(Vec::new()));
        let port = FlakyPort {
            failed: false,
            written: written.clone(),
        };
        let (sender, receiver) = mpsc::sync_channel(1);
        sender.send(vec![255u8; 6]).unwrap();

        let frames_sent = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        worker_thread(port, receiver, config.clone(), 2, frames_sent.clone(), running);

        assert_eq!(frames_sent.load(Ordering::Relaxed), 0);
        let blank = config.protocol.frame(&[0u8; 6], 3);
        assert_eq!(*written.lock().unwrap(), blank);
    }
}
