use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single telemetry sample produced once per simulation tick.
///
/// Packets have a fixed encoded size, [TelemetryPacket::LEN], with all numeric fields encoded
/// big-endian in declaration order:
///
/// ```text
/// offset  size  field
///      0     8  timestamp (u64)
///      8     4  temperature (f32)
///     12     4  radiation (f32)
///     16     4  battery_voltage (f32)
///     20    12  position x, y, z (f32)
///     32    12  orientation pitch, roll, yaw (f32)
/// ```
///
/// Floats are written using their IEEE-754 bit patterns so a decode of an encode is bit-exact.
///
/// # Example
/// ```
/// use telemetry::TelemetryPacket;
///
/// let packet = TelemetryPacket {
///     timestamp: 1,
///     temperature: 24.9,
///     ..Default::default()
/// };
/// let bytes = packet.encode();
/// assert_eq!(bytes.len(), TelemetryPacket::LEN);
/// assert_eq!(TelemetryPacket::decode(&bytes).unwrap(), packet);
/// ```
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq)]
pub struct TelemetryPacket {
    /// Tick counter; starts at 1. Zero is reserved for [TelemetryPacket::SENTINEL].
    pub timestamp: u64,
    /// Degrees Celsius
    pub temperature: f32,
    pub radiation: f32,
    /// Volts
    pub battery_voltage: f32,
    /// Orbital position in km
    pub position: [f32; 3],
    /// Pitch, roll, yaw in degrees
    pub orientation: [f32; 3],
}

impl TelemetryPacket {
    /// Encoded packet size in bytes.
    pub const LEN: usize = 8 + 4 * 3 + 4 * 3 + 4 * 3;

    /// End-of-stream marker handed out by a shut down queue. No generated packet ever has a
    /// timestamp of 0.
    pub const SENTINEL: TelemetryPacket = TelemetryPacket {
        timestamp: 0,
        temperature: 0.0,
        radiation: 0.0,
        battery_voltage: 0.0,
        position: [0.0; 3],
        orientation: [0.0; 3],
    };

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.timestamp == 0
    }

    /// Encode into exactly [TelemetryPacket::LEN] bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[..8].copy_from_slice(&self.timestamp.to_be_bytes());

        let floats = [
            self.temperature,
            self.radiation,
            self.battery_voltage,
            self.position[0],
            self.position[1],
            self.position[2],
            self.orientation[0],
            self.orientation[1],
            self.orientation[2],
        ];
        for (chunk, val) in buf[8..].chunks_exact_mut(4).zip(floats) {
            chunk.copy_from_slice(&val.to_bits().to_be_bytes());
        }
        buf
    }

    /// Decode from bytes.
    ///
    /// # Errors
    /// [Error::MalformedPayload] if `dat` is not exactly [TelemetryPacket::LEN] bytes.
    pub fn decode(dat: &[u8]) -> Result<Self> {
        if dat.len() != Self::LEN {
            return Err(Error::MalformedPayload {
                actual: dat.len(),
                expected: Self::LEN,
            });
        }

        let float_at = |offset: usize| {
            f32::from_bits(u32::from_be_bytes([
                dat[offset],
                dat[offset + 1],
                dat[offset + 2],
                dat[offset + 3],
            ]))
        };
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&dat[..8]);

        Ok(TelemetryPacket {
            timestamp: u64::from_be_bytes(timestamp),
            temperature: float_at(8),
            radiation: float_at(12),
            battery_voltage: float_at(16),
            position: [float_at(20), float_at(24), float_at(28)],
            orientation: [float_at(32), float_at(36), float_at(40)],
        })
    }
}

impl Display for TelemetryPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TelemetryPacket{{tick={} temp={:.2} rad={:.4} batt={:.3} pos=({:.1},{:.1},{:.1}) orient=({:.2},{:.2},{:.2})}}",
            self.timestamp,
            self.temperature,
            self.radiation,
            self.battery_voltage,
            self.position[0],
            self.position[1],
            self.position[2],
            self.orientation[0],
            self.orientation[1],
            self.orientation[2],
        )
    }
}

/// Encode `packet` into a newly allocated buffer of [TelemetryPacket::LEN] bytes.
#[must_use]
pub fn encode(packet: &TelemetryPacket) -> Vec<u8> {
    packet.encode().to_vec()
}

/// Decode a packet previously produced by [encode].
///
/// # Errors
/// [Error::MalformedPayload] if there are not exactly [TelemetryPacket::LEN] bytes.
pub fn decode(dat: &[u8]) -> Result<TelemetryPacket> {
    TelemetryPacket::decode(dat)
}
