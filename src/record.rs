//! Taps that copy pixel packets somewhere else as they pass through.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::TcpStream;
use std::path::Path;

use anyhow::{Context, Result};

use crate::decode::{DecodedPacket, Protocol};

pub trait PacketTap: Send {
    /// Called for every packet that was drawn, with its bytes as received
    fn packet(&mut self, raw: &[u8], packet: &DecodedPacket) -> io::Result<()>;
}

/// Writes OPC pixel messages verbatim. Backs both the recorder and the
/// forwarder used by `send`.
pub struct OpcWriter<W: Write> {
    out: W,
}

impl<W: Write> OpcWriter<W> {
    pub fn new(out: W) -> Self {
        OpcWriter { out }
    }
}

impl OpcWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create recording {}", path.display()))?;
        Ok(OpcWriter::new(BufWriter::new(file)))
    }
}

impl OpcWriter<TcpStream> {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .with_context(|| format!("Connect to {} failed", addr))?;
        // One small write per frame; don't let Nagle batch them
        stream.set_nodelay(true)?;
        Ok(OpcWriter::new(stream))
    }
}

impl<W: Write + Send> PacketTap for OpcWriter<W> {
    fn packet(&mut self, raw: &[u8], packet: &DecodedPacket) -> io::Result<()> {
        // Only OPC bytes can be replayed as OPC
        if packet.protocol != Protocol::Opc {
            return Ok(());
        }
        self.out.write_all(raw)?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{e131, opc};

    #[test]
    fn test_writes_opc_verbatim() {
        let raw = opc::encode(1, 0, &[1, 2, 3, 4]);
        let packet = opc::decode(&raw).unwrap();

        let mut out = Vec::new();
        OpcWriter::new(&mut out).packet(&raw, &packet).unwrap();
        OpcWriter::new(&mut out).packet(&raw, &packet).unwrap();
        assert_eq!(out, [raw.clone(), raw].concat());
    }

    #[test]
    fn test_skips_e131() {
        let raw = e131::encode(1, &[1, 2, 3]);
        let packet = e131::decode(&raw).unwrap();

        let mut out = Vec::new();
        OpcWriter::new(&mut out).packet(&raw, &packet).unwrap();
        assert!(out.is_empty());
    }
}
