use std::io::{stdout, BufWriter, Write};

use anyhow::{Context, Result};
use telemetry::TelemetrySimulator;
use tracing::info;

use crate::Format;

/// Write `count` simulated packets to stdout, one per line.
///
/// JSON output is newline delimited, one object per packet.
pub fn generate(count: usize, dt: f64, seed: Option<u64>, format: &Format) -> Result<()> {
    let mut sim = match seed {
        Some(seed) => TelemetrySimulator::new(seed),
        None => TelemetrySimulator::from_entropy(),
    };
    info!(seed = sim.seed(), count, dt, "generating packets");

    let mut out = BufWriter::new(stdout().lock());
    for _ in 0..count {
        let packet = sim.generate_packet(dt);
        match format {
            Format::Json => {
                serde_json::to_writer(&mut out, &packet).context("serializing packet")?;
                writeln!(out)?;
            }
            Format::Text => writeln!(out, "{packet}")?,
        }
    }
    out.flush()?;
    Ok(())
}
