//! Packet sources: where raw bytes come from and how much to read per packet.
//!
//! UDP delivers one E1.31 packet per datagram. OPC arrives as a byte stream
//! (TCP or a recording) and is read header first, then until the announced
//! payload is complete or the stream ends.

use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::net::UdpSocket;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::decode::opc::{self, OpcHeader, HEADER_LEN};
use crate::decode::{e131, DecodeError, DecodedPacket, RECV_BUFFER_SIZE};

/// Pause after a failed datagram receive before trying again
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// One packet as read off the wire
#[derive(Debug)]
pub struct Received {
    /// Bytes of the whole message, header included
    pub raw: Vec<u8>,
    pub decoded: Result<DecodedPacket, DecodeError>,
    /// When reading this packet started (after the header, for streams)
    pub started: Instant,
}

pub trait PacketSource {
    /// Block until the next packet. `Ok(None)` means the source is finished:
    /// connection closed, file exhausted, or shutdown requested.
    fn receive(&mut self) -> io::Result<Option<Received>>;

    /// Finite sources replayed at a fixed frame rate
    fn is_paced(&self) -> bool {
        false
    }
}

enum Fill {
    Full,
    Eof(usize),
    Stopped,
}

fn keep_running(running: &Option<Arc<AtomicBool>>) -> bool {
    running.as_ref().map_or(true, |r| r.load(Ordering::Relaxed))
}

/// Read until `buf` is full or the reader reports EOF. Read timeouts only
/// serve to poll the shutdown flag; partial data is kept across them.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8], running: &Option<Arc<AtomicBool>>) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            // Peer closed or file exhausted
            Ok(0) => return Ok(Fill::Eof(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                // No data yet, check if we should stop
                if !keep_running(running) {
                    return Ok(Fill::Stopped);
                }
            }
            // Reset, broken pipe and friends end this stream
            Err(e) => return Err(e),
        }
    }
    Ok(Fill::Full)
}

/// OPC messages from any byte stream
pub struct OpcStream<R> {
    reader: R,
    buf: Vec<u8>,
    running: Option<Arc<AtomicBool>>,
}

impl<R: Read> OpcStream<R> {
    pub fn new(reader: R) -> Self {
        OpcStream {
            reader,
            buf: vec![0u8; RECV_BUFFER_SIZE],
            running: None,
        }
    }

    /// Stop at the next read timeout once `running` is cleared
    pub fn with_shutdown(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }
}

impl<R: Read> PacketSource for OpcStream<R> {
    fn receive(&mut self) -> io::Result<Option<Received>> {
        // Read the 4 byte header first
        let mut header = [0u8; HEADER_LEN];
        match fill(&mut self.reader, &mut header, &self.running)? {
            Fill::Full => {}
            Fill::Eof(0) | Fill::Stopped => return Ok(None),
            Fill::Eof(n) => {
                log::warn!("stream ended inside an OPC header ({} of {} bytes)", n, HEADER_LEN);
                return Ok(None);
            }
        }
        let header = OpcHeader::parse(header);
        let started = Instant::now();

        // Then the payload, keeping whatever arrived if the stream ends early
        let payload_len = match fill(&mut self.reader, &mut self.buf[..header.len], &self.running)? {
            Fill::Full => header.len,
            Fill::Eof(n) => {
                log::debug!("stream ended after {} of {} payload bytes", n, header.len);
                n
            }
            Fill::Stopped => return Ok(None),
        };
        let payload = &self.buf[..payload_len];

        // Keep the wire bytes for recording and forwarding
        let mut raw = Vec::with_capacity(HEADER_LEN + payload_len);
        raw.extend_from_slice(&header.to_bytes());
        raw.extend_from_slice(payload);

        Ok(Some(Received {
            raw,
            decoded: opc::decode_parts(header, payload),
            started,
        }))
    }
}

/// Replays an OPC recording, optionally rewinding at EOF
pub struct Playback {
    stream: OpcStream<BufReader<File>>,
    looping: bool,
    packets_this_pass: u64,
    bytes_this_pass: u64,
}

impl Playback {
    pub fn open(path: &Path, looping: bool) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Playback {
            stream: OpcStream::new(BufReader::new(file)),
            looping,
            packets_this_pass: 0,
            bytes_this_pass: 0,
        })
    }
}

impl PacketSource for Playback {
    fn receive(&mut self) -> io::Result<Option<Received>> {
        loop {
            if let Some(received) = self.stream.receive()? {
                self.packets_this_pass += 1;
                self.bytes_this_pass += received.raw.len() as u64;
                return Ok(Some(received));
            }
            log::info!(
                "Bytes read: {}, frames read: {}",
                self.bytes_this_pass,
                self.packets_this_pass
            );
            // A file with nothing in it would rewind forever
            if !self.looping || self.packets_this_pass == 0 {
                log::info!("closing file after {} packets", self.packets_this_pass);
                return Ok(None);
            }
            log::info!("looping file after {} packets", self.packets_this_pass);
            self.packets_this_pass = 0;
            self.bytes_this_pass = 0;
            self.stream.get_mut().seek(SeekFrom::Start(0))?;
        }
    }

    fn is_paced(&self) -> bool {
        true
    }
}

/// Anything that hands out one datagram per call
pub trait DatagramSocket {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

impl DatagramSocket for UdpSocket {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf)
    }
}

/// E1.31 datagrams from a bound UDP socket
pub struct Datagrams<S = UdpSocket> {
    socket: S,
    buf: Vec<u8>,
    running: Option<Arc<AtomicBool>>,
}

impl<S: DatagramSocket> Datagrams<S> {
    pub fn new(socket: S) -> Self {
        Datagrams {
            socket,
            buf: vec![0u8; RECV_BUFFER_SIZE],
            running: None,
        }
    }

    pub fn with_shutdown(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }
}

impl<S: DatagramSocket> PacketSource for Datagrams<S> {
    fn receive(&mut self) -> io::Result<Option<Received>> {
        loop {
            match self.socket.recv(&mut self.buf) {
                // One datagram is one whole packet
                Ok(n) => {
                    let datagram = &self.buf[..n];
                    return Ok(Some(Received {
                        raw: datagram.to_vec(),
                        decoded: e131::decode(datagram),
                        started: Instant::now(),
                    }));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    if !keep_running(&self.running) {
                        return Ok(None);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // A failed receive never takes the socket down, but still honors shutdown
                Err(e) => {
                    log::warn!("recv failed: {}", e);
                    if !keep_running(&self.running) {
                        return Ok(None);
                    }
                    thread::sleep(RECV_ERROR_BACKOFF);
                }
            }
        }
    }
}
