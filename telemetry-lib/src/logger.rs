//! Durable storage for received packets.
use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{Result, TelemetryPacket};

/// Destination for packets reconstructed by the ground station.
///
/// Sinks are called synchronously, once per packet, in the order packets were received.
pub trait PacketSink {
    /// Accept a single decoded packet.
    ///
    /// # Errors
    /// If the packet could not be stored. The caller reports the failure and carries on
    /// with the next packet; it does not retry.
    fn accept(&mut self, packet: &TelemetryPacket) -> Result<()>;
}

impl PacketSink for Vec<TelemetryPacket> {
    fn accept(&mut self, packet: &TelemetryPacket) -> Result<()> {
        self.push(*packet);
        Ok(())
    }
}

impl<S> PacketSink for &mut S
where
    S: PacketSink + ?Sized,
{
    fn accept(&mut self, packet: &TelemetryPacket) -> Result<()> {
        (**self).accept(packet)
    }
}

/// Column header written to new CSV log files.
pub const CSV_HEADER: &str = "timestamp,temperature,radiation,pos_x,pos_y,pos_z,pitch,roll,yaw,battery";

/// Appends one CSV row per packet, flushing after every row so a crash loses at most the
/// packet being written.
pub struct CsvLogger<W>
where
    W: Write,
{
    writer: W,
    rows: usize,
}

impl CsvLogger<BufWriter<File>> {
    /// Open `dir/filename` for appending, creating `dir` if necessary.
    ///
    /// The header row is only written if the file is empty.
    ///
    /// # Errors
    /// If the directory or file cannot be created or opened.
    pub fn create<P: AsRef<Path>>(dir: P, filename: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let path: PathBuf = dir.join(filename);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let needs_header = file.metadata()?.len() == 0;
        debug!(?path, needs_header, "opened telemetry log");

        let mut logger = CsvLogger::new(BufWriter::new(file));
        if needs_header {
            logger.write_header()?;
        }
        Ok(logger)
    }
}

impl<W> CsvLogger<W>
where
    W: Write,
{
    /// Wrap an arbitrary writer. No header is written.
    pub fn new(writer: W) -> Self {
        CsvLogger { writer, rows: 0 }
    }

    pub fn write_header(&mut self) -> Result<()> {
        writeln!(self.writer, "{CSV_HEADER}")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Append a single row for `packet`.
    ///
    /// # Errors
    /// If writing or flushing fails.
    pub fn log_packet(&mut self, packet: &TelemetryPacket) -> Result<()> {
        let [x, y, z] = packet.position;
        let [pitch, roll, yaw] = packet.orientation;
        writeln!(
            self.writer,
            "{},{},{},{x},{y},{z},{pitch},{roll},{yaw},{}",
            packet.timestamp, packet.temperature, packet.radiation, packet.battery_voltage,
        )?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Number of packet rows written by this logger.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> PacketSink for CsvLogger<W>
where
    W: Write,
{
    fn accept(&mut self, packet: &TelemetryPacket) -> Result<()> {
        self.log_packet(packet)
    }
}
