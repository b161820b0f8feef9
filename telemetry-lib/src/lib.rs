#![doc = include_str!("../README.md")]

mod error;

pub mod compression;
pub mod framing;
pub mod link;
pub mod logger;
pub mod packet;
pub mod queue;
pub mod sensors;

pub use error::{Error, Result};
pub use link::{GroundStation, GroundStationConfig, LinkConfig};
pub use logger::{CsvLogger, PacketSink};
pub use packet::TelemetryPacket;
pub use queue::BoundedQueue;
pub use sensors::TelemetrySimulator;
