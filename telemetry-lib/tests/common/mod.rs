#![allow(dead_code)]
use std::io::{self, Read};

use telemetry::{TelemetryPacket, TelemetrySimulator};

/// Reader that returns at most `chunk` bytes per read.
pub struct Chunked<R> {
    inner: R,
    chunk: usize,
}

impl<R: Read> Chunked<R> {
    pub fn new(inner: R, chunk: usize) -> Self {
        Chunked { inner, chunk }
    }
}

impl<R: Read> Read for Chunked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.chunk);
        self.inner.read(&mut buf[..n])
    }
}

pub fn simulated_packets(seed: u64, count: usize) -> Vec<TelemetryPacket> {
    let mut sim = TelemetrySimulator::new(seed);
    (0..count).map(|_| sim.generate_packet(1.0)).collect()
}
