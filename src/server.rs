use anyhow::{Context, Result};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::decode::DecodedPacket;
use crate::pacing::{LoopReport, PacingLoop, SleepThrottle};
use crate::record::{OpcWriter, PacketTap};
use crate::render::{self, RenderSink, Renderer, SharedRenderer};
use crate::source::{Datagrams, OpcStream, PacketSource, Playback};
use crate::stats::StatsReporter;

/// How often blocked accepts and reads look at the running flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// A tap shared by several receive loops (one recording for all clients)
pub type SharedTap = Arc<Mutex<dyn PacketTap>>;

struct SharedTapHandle(SharedTap);

impl PacketTap for SharedTapHandle {
    fn packet(&mut self, raw: &[u8], packet: &DecodedPacket) -> io::Result<()> {
        // A client thread that panicked mid-write leaves the file usable
        let mut tap = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tap.packet(raw, packet)
    }
}

/// Owns the frame buffer context and runs receive loops against it
pub struct Server {
    config: Config,
    renderer: SharedRenderer,
    recorder: Option<SharedTap>,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn new(config: Config, sink: Box<dyn RenderSink>) -> Self {
        let renderer = Renderer::new(config.layout.strip_count, config.layout.led_count, sink).shared();
        Server {
            config,
            renderer,
            recorder: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get a clone of the running flag for signal handlers
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    #[cfg(test)]
    pub fn renderer(&self) -> &SharedRenderer {
        &self.renderer
    }

    /// Append every received pixel command to an OPC recording
    pub fn record_to(&mut self, path: &Path) -> Result<()> {
        log::info!("Writing OPC data to file: {}", path.display());
        let writer: SharedTap = Arc::new(Mutex::new(OpcWriter::create(path)?));
        self.recorder = Some(writer);
        Ok(())
    }

    /// Fill the frame with a constant and draw it before any input
    pub fn lamp_test(&self, value: u8) -> Result<()> {
        render::lock(&self.renderer).lamp_test(value)
    }

    fn pacing_loop<S: PacketSource>(&self, source: S) -> PacingLoop<S> {
        // Every loop reports on its own; only the renderer is shared
        let stats = StatsReporter::new(self.config.pacing.report_interval());
        let mut pacing = PacingLoop::new(source, Arc::clone(&self.renderer), stats, self.get_running_flag());
        if let Some(recorder) = &self.recorder {
            pacing = pacing.with_tap(Box::new(SharedTapHandle(Arc::clone(recorder))));
        }
        pacing
    }

    /// Accept OPC clients until shutdown. Each client gets its own thread and
    /// receive buffer; all of them draw into the same frame.
    pub fn serve_opc(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).with_context(|| format!("Failed to bind to {}", addr))?;
        // Nonblocking so accept() can check the running flag periodically
        listener.set_nonblocking(true)?;
        log::info!("OPC server listening on {}", listener.local_addr()?);

        // Handles of client threads still running
        let mut clients: Vec<thread::JoinHandle<()>> = Vec::new();
        while self.running.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    log::info!("Client connected from {}", peer);
                    match self.spawn_client(stream, peer) {
                        Ok(handle) => clients.push(handle),
                        Err(e) => log::warn!("Dropping client {}: {:#}", peer, e),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    // No pending connection, sleep briefly and check running flag
                    thread::sleep(SHUTDOWN_POLL);
                }
                Err(e) => {
                    // Keep listening; one bad accept is not fatal
                    log::warn!("Error accepting connection: {}", e);
                    thread::sleep(SHUTDOWN_POLL);
                }
            }
            // Forget clients that already hung up
            clients.retain(|handle| !handle.is_finished());
        }

        // Running flag is clear, so every client stops at its next read timeout
        for handle in clients {
            let _ = handle.join();
        }
        Ok(())
    }

    fn spawn_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<thread::JoinHandle<()>> {
        // Accepted sockets inherit nonblocking mode from the listener
        stream.set_nonblocking(false)?;
        // Blocking reads that still wake up to check the running flag
        stream.set_read_timeout(Some(SHUTDOWN_POLL))?;
        let source = OpcStream::new(stream).with_shutdown(self.get_running_flag());
        let mut pacing = self.pacing_loop(source);

        let handle = thread::Builder::new()
            .name(format!("opc-{}", peer))
            // Errors end this client only; the accept loop carries on
            .spawn(move || match pacing.run() {
                Ok(report) => log::info!("Client {} disconnected after {} frames", peer, report.frames),
                Err(e) => log::warn!("Error handling client {}: {}", peer, e),
            })?;
        Ok(handle)
    }

    /// Receive E1.31 datagrams until shutdown
    pub fn serve_e131(&self, addr: &str) -> Result<LoopReport> {
        let socket = UdpSocket::bind(addr).with_context(|| format!("bind {} failed", addr))?;
        // Wake up periodically to check the running flag
        socket.set_read_timeout(Some(SHUTDOWN_POLL))?;
        log::info!("E1.31 receiver listening on {}", socket.local_addr()?);

        let source = Datagrams::new(socket).with_shutdown(self.get_running_flag());
        let report = self.pacing_loop(source).run()?;
        Ok(report)
    }

    /// Replay a recording at the configured frame rate
    pub fn play(&self, path: &Path, looping: bool) -> Result<LoopReport> {
        let source = Playback::open(path, looping)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        log::info!("Frame rate: {} fps", self.config.pacing.frame_rate);
        log::info!("Playing {}", path.display());

        // Recordings carry no timing, so replay at the configured rate
        let throttle = SleepThrottle::new(self.config.pacing.frame_rate, self.config.pacing.overhead());
        let report = self.pacing_loop(source).with_throttle(Box::new(throttle)).run()?;
        log::info!(
            "Played {} frames, skipped {} packets ({} bytes)",
            report.frames,
            report.skipped,
            report.bytes
        );
        Ok(report)
    }

    /// Replay a recording to a remote OPC server at the configured frame rate
    pub fn send(&self, path: &Path, addr: &str, looping: bool) -> Result<LoopReport> {
        let source = Playback::open(path, looping)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        // Each pixel packet also goes out verbatim to the remote server
        let forward = OpcWriter::connect(addr)?;
        log::info!("OPC host: {}", addr);
        log::info!("Frame rate: {} fps", self.config.pacing.frame_rate);
        log::info!("Loop: {}", if looping { "yes" } else { "no" });

        let throttle = SleepThrottle::new(self.config.pacing.frame_rate, self.config.pacing.overhead());
        let report = self
            .pacing_loop(source)
            .with_throttle(Box::new(throttle))
            .with_tap(Box::new(forward))
            .run()
            .with_context(|| format!("Sending to {} failed", addr))?;
        log::info!("Bytes read: {}", report.bytes);
        log::info!("Frames sent: {}", report.frames);
        Ok(report)
    }

    /// Stop all loops and darken the LEDs
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        // Leave the LEDs dark rather than frozen on the last frame
        if let Err(e) = render::lock(&self.renderer).blackout() {
            log::warn!("Blackout failed: {:#}", e);
        }
        log::info!("Server stopped");
    }
}
