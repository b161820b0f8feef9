//! Lossless zlib compression of encoded packets.
//!
//! Telemetry packets are fixed size, so the receiver always knows how many bytes a payload
//! must inflate to and [decompress] verifies it.
use std::io::Write;

use flate2::{write::ZlibEncoder, Decompress, FlushDecompress, Status};
use tracing::trace;

use crate::{Error, Result};

pub use flate2::Compression as Level;

/// Compress `input` using the default compression level.
///
/// Output is not guaranteed to be smaller than the input.
#[must_use]
pub fn compress(input: &[u8]) -> Vec<u8> {
    compress_with(input, Level::default())
}

/// Compress `input` using the provided compression level.
#[must_use]
pub fn compress_with(input: &[u8], level: Level) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::with_capacity(input.len() + 16), level);
    // Writes into a Vec cannot fail
    let out = match enc.write_all(input).and_then(|()| enc.finish()) {
        Ok(out) => out,
        Err(err) => unreachable!("in-memory zlib encode failed: {err}"),
    };
    trace!(raw = input.len(), compressed = out.len(), "compressed");
    out
}

/// Decompress `input`, which must be one complete zlib stream inflating to exactly
/// `expected_size` bytes.
///
/// No more than `expected_size + 1` bytes are ever inflated, so a corrupt or hostile stream
/// cannot cause an unbounded allocation.
///
/// # Errors
/// [Error::DecompressionFailed] if the stream is truncated or corrupt, is followed by trailing
/// bytes, or the inflated length is not `expected_size`.
pub fn decompress(input: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let mut dec = Decompress::new(true);
    let mut out = Vec::with_capacity(expected_size + 1);
    let status = dec
        .decompress_vec(input, &mut out, FlushDecompress::Finish)
        .map_err(|err| Error::DecompressionFailed(err.to_string()))?;

    if out.len() > expected_size {
        return Err(Error::DecompressionFailed(format!(
            "inflated to more than {expected_size} bytes"
        )));
    }
    if status != Status::StreamEnd {
        return Err(Error::DecompressionFailed(format!(
            "truncated stream; inflated {} of {expected_size} bytes",
            out.len()
        )));
    }
    if out.len() != expected_size {
        return Err(Error::DecompressionFailed(format!(
            "inflated to {} bytes, expected {expected_size}",
            out.len()
        )));
    }
    let consumed = usize::try_from(dec.total_in()).unwrap_or(usize::MAX);
    if consumed != input.len() {
        return Err(Error::DecompressionFailed(format!(
            "{} trailing bytes after stream",
            input.len().saturating_sub(consumed)
        )));
    }
    Ok(out)
}
