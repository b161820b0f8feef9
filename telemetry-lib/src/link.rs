//! Spacecraft and ground station roles of the telemetry link.
//!
//! The spacecraft side runs two threads sharing a [BoundedQueue]: a sensor thread that samples
//! a [TelemetrySimulator] on a fixed interval and pushes packets, and a transmitter thread that
//! pops packets and writes them to the link as compressed, length prefixed messages. The
//! ground station accepts a single connection and hands every decoded packet to a
//! [PacketSink].
//!
//! ```text
//! sensor -> queue -> transmitter -> [stream] -> ground station -> sink
//! ```
use std::{
    fmt::Display,
    io::{BufReader, Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    panic,
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::{
    channel::{after, tick},
    select,
};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};
use typed_builder::TypedBuilder;

use crate::{
    compression::{compress_with, decompress, Level},
    framing::{read_frames, send_frame, PREFIX_LEN},
    logger::PacketSink,
    BoundedQueue, Error, Result, TelemetryPacket, TelemetrySimulator,
};

/// Well-known ground station port.
pub const DEFAULT_PORT: u16 = 5000;

/// Spacecraft side configuration.
#[derive(Debug, Clone, TypedBuilder)]
pub struct LinkConfig {
    /// Number of packets the queue between sensor and transmitter can hold.
    #[builder(default = 100)]
    pub capacity: usize,
    /// Time between sensor samples.
    #[builder(default = Duration::from_secs(1))]
    pub sample_interval: Duration,
    /// How long the sensor runs before the queue is shut down.
    #[builder(default = Duration::from_secs(10))]
    pub run_duration: Duration,
    /// Seed for sensor noise. A random seed is chosen when not set.
    #[builder(default, setter(strip_option))]
    pub seed: Option<u64>,
    #[builder(default)]
    pub compression_level: Level,
    /// Number of undecodable messages in a row after which the receiver gives up. Zero
    /// disables the limit.
    #[builder(default = 8)]
    pub max_consecutive_failures: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig::builder().build()
    }
}

/// Default log file name, `telemetry_<unix-seconds>.csv`.
#[must_use]
pub fn default_log_file() -> String {
    format!("telemetry_{}.csv", chrono::Utc::now().timestamp())
}

/// Ground station configuration.
#[derive(Debug, Clone, TypedBuilder)]
pub struct GroundStationConfig {
    #[builder(default = SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)))]
    pub bind: SocketAddr,
    #[builder(default = PathBuf::from("logs"), setter(into))]
    pub log_dir: PathBuf,
    #[builder(default = default_log_file(), setter(into))]
    pub log_file: String,
}

impl Default for GroundStationConfig {
    fn default() -> Self {
        GroundStationConfig::builder().build()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorStats {
    /// Packets generated and accepted by the queue.
    pub generated: u64,
    /// Packets generated after the queue was shut down.
    pub dropped: u64,
}

impl Display for SensorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "generated={} dropped={}", self.generated, self.dropped)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransmitStats {
    /// Packets written to the link.
    pub packets: u64,
    /// Encoded packet bytes before compression.
    pub raw_bytes: u64,
    /// Bytes written to the link, including length prefixes.
    pub wire_bytes: u64,
    /// Packets that could not be framed and were skipped.
    pub skipped: u64,
}

impl Display for TransmitStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "packets={} raw_bytes={} wire_bytes={} skipped={}",
            self.packets, self.raw_bytes, self.wire_bytes, self.skipped
        )
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReceiveStats {
    /// Packets successfully decoded.
    pub packets: u64,
    /// Bytes read from the link, including length prefixes.
    pub wire_bytes: u64,
    /// Messages that failed to decompress or decode.
    pub failed: u64,
    /// Decoded packets the sink failed to store.
    pub sink_failures: u64,
}

impl Display for ReceiveStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "packets={} wire_bytes={} failed={} sink_failures={}",
            self.packets, self.wire_bytes, self.failed, self.sink_failures
        )
    }
}

/// Encode, then compress, a packet into a message payload.
#[must_use]
pub fn encode_payload(packet: &TelemetryPacket, level: Level) -> Vec<u8> {
    compress_with(&packet.encode(), level)
}

/// Decompress, then decode, a message payload.
///
/// # Errors
/// [Error::DecompressionFailed] or [Error::MalformedPayload] if the payload does not hold
/// exactly one encoded packet.
pub fn decode_payload(payload: &[u8]) -> Result<TelemetryPacket> {
    let raw = decompress(payload, TelemetryPacket::LEN)?;
    TelemetryPacket::decode(&raw)
}

/// Sample `sim` every `interval` for `duration`, pushing each packet onto `queue`.
///
/// Returns early if the queue is shut down by another thread. The queue is not shut down
/// by this function.
pub fn run_sensor(
    queue: &BoundedQueue<TelemetryPacket>,
    sim: &mut TelemetrySimulator,
    interval: Duration,
    duration: Duration,
) -> SensorStats {
    let span = info_span!("sensor");
    let _guard = span.enter();
    info!(?interval, ?duration, "sensor started");

    let ticker = tick(interval);
    let deadline = after(duration);
    let mut last = Instant::now();
    let mut stats = SensorStats::default();

    loop {
        select! {
            recv(ticker) -> msg => {
                let Ok(now) = msg else { break };
                let dt = now.saturating_duration_since(last).as_secs_f64();
                last = now;

                let packet = sim.generate_packet(dt);
                if !queue.push(packet) {
                    debug!(timestamp = packet.timestamp, "queue shut down; dropping packet");
                    stats.dropped += 1;
                    break;
                }
                stats.generated += 1;
                debug!(timestamp = packet.timestamp, queued = queue.len(), "sampled");
            }
            recv(deadline) -> _ => break,
        }
    }

    info!(generated = stats.generated, "sensor stopped");
    stats
}

/// Pop packets from `queue` and write them to `writer` until the queue is shut down and
/// drained.
///
/// A packet that cannot be framed is logged and skipped.
///
/// # Errors
/// Any write failure ends the transmitter and is returned. Packets remaining in the queue
/// are left there.
pub fn transmit<W>(
    queue: &BoundedQueue<TelemetryPacket>,
    writer: &mut W,
    level: Level,
) -> Result<TransmitStats>
where
    W: Write + ?Sized,
{
    let span = info_span!("transmitter");
    let _guard = span.enter();
    info!("transmitter started");

    let mut stats = TransmitStats::default();
    while let Some(packet) = queue.pop() {
        let payload = encode_payload(&packet, level);
        match send_frame(writer, &payload) {
            Ok(()) => {
                stats.packets += 1;
                stats.raw_bytes += TelemetryPacket::LEN as u64;
                stats.wire_bytes += (PREFIX_LEN + payload.len()) as u64;
                debug!(
                    timestamp = packet.timestamp,
                    len = payload.len(),
                    "sent packet"
                );
            }
            Err(err) if !err.is_connection_level() => {
                warn!(timestamp = packet.timestamp, "skipping packet: {err}");
                stats.skipped += 1;
            }
            Err(err) => {
                error!(timestamp = packet.timestamp, "transmitter failed: {err}");
                return Err(err);
            }
        }
    }

    info!(packets = stats.packets, "transmitter finished");
    Ok(stats)
}

/// Read messages from `reader` and hand each decoded packet to `sink` until the peer closes
/// the connection.
///
/// Messages that fail to decompress or decode are logged and skipped. Sink failures are
/// logged and not retried.
///
/// # Errors
/// - [Error::TooManyFailures] if `max_failures` messages in a row could not be decoded
///   (zero disables this limit)
/// - [Error::TruncatedMessage], [Error::PayloadTooLarge], or [Error::Io] if the connection
///   failed
pub fn receive<R, S>(reader: R, mut sink: S, max_failures: usize) -> Result<ReceiveStats>
where
    R: Read,
    S: PacketSink,
{
    let span = info_span!("receiver");
    let _guard = span.enter();

    let mut stats = ReceiveStats::default();
    let mut consecutive = 0;

    for zult in read_frames(reader) {
        let payload = match zult {
            Ok(payload) => payload,
            Err(err) => {
                error!("connection failed: {err}");
                return Err(err);
            }
        };
        stats.wire_bytes += (PREFIX_LEN + payload.len()) as u64;

        let packet = match decode_payload(&payload) {
            Ok(packet) => packet,
            Err(err) => {
                stats.failed += 1;
                consecutive += 1;
                warn!(consecutive, len = payload.len(), "skipping message: {err}");
                if max_failures > 0 && consecutive >= max_failures {
                    error!(consecutive, "giving up on connection");
                    return Err(Error::TooManyFailures(consecutive));
                }
                continue;
            }
        };
        consecutive = 0;
        stats.packets += 1;

        info!(
            timestamp = packet.timestamp,
            temperature = packet.temperature,
            voltage = packet.battery_voltage,
            radiation = packet.radiation,
            "received packet"
        );
        if let Err(err) = sink.accept(&packet) {
            warn!(timestamp = packet.timestamp, "failed to log packet: {err}");
            stats.sink_failures += 1;
        }
    }

    info!(packets = stats.packets, "connection closed by peer");
    Ok(stats)
}

/// Receiving end of the link. Serves one peer at a time.
#[derive(Debug)]
pub struct GroundStation {
    listener: TcpListener,
}

impl GroundStation {
    /// Bind the listening socket. Senders may connect as soon as this returns.
    ///
    /// # Errors
    /// If the address cannot be bound.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!(addr = ?listener.local_addr()?, "ground station listening");
        Ok(GroundStation { listener })
    }

    /// # Errors
    /// If the socket address cannot be determined.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Address a sender on this host should connect to. Unspecified bind addresses map to
    /// loopback.
    ///
    /// # Errors
    /// If the socket address cannot be determined.
    pub fn connect_addr(&self) -> Result<SocketAddr> {
        let mut addr = self.local_addr()?;
        if addr.ip().is_unspecified() {
            addr.set_ip(Ipv4Addr::LOCALHOST.into());
        }
        Ok(addr)
    }

    /// Accept a single connection and receive from it until it is closed.
    ///
    /// # Errors
    /// If accepting fails, or any error from [receive].
    pub fn serve_one<S>(&self, sink: S, max_failures: usize) -> Result<ReceiveStats>
    where
        S: PacketSink,
    {
        let (stream, peer) = self.listener.accept()?;
        let span = info_span!("ground_station", %peer);
        let _guard = span.enter();
        info!("accepted connection");
        receive(BufReader::new(stream), sink, max_failures)
    }
}

/// Outcome of running the spacecraft side of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpacecraftReport {
    pub seed: u64,
    pub sensor: SensorStats,
    pub transmit: TransmitStats,
}

impl Display for SpacecraftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "seed:           {}", self.seed)?;
        writeln!(f, "sensor:         {}", self.sensor)?;
        write!(f, "transmitter:    {}", self.transmit)
    }
}

/// Outcome of a full in-process simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub spacecraft: SpacecraftReport,
    pub ground_station: ReceiveStats,
}

impl Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.spacecraft)?;
        write!(f, "ground station: {}", self.ground_station)
    }
}

fn spawn<F, T>(name: &str, f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .unwrap_or_else(|err| panic!("failed to spawn {name} thread: {err}"))
}

fn join<T>(handle: JoinHandle<T>) -> T {
    handle
        .join()
        .unwrap_or_else(|payload| panic::resume_unwind(payload))
}

/// Run the sensor and transmitter threads, writing to `writer`, until the configured run
/// duration has elapsed and every queued packet has been sent.
///
/// If the transmitter fails the queue is shut down so the sensor stops early.
///
/// # Errors
/// Any error returned by [transmit].
///
/// # Panics
/// If a thread cannot be spawned. Panics in either thread are propagated.
pub fn run_spacecraft<W>(config: &LinkConfig, mut writer: W) -> Result<SpacecraftReport>
where
    W: Write + Send + 'static,
{
    let seed = config.seed.unwrap_or_else(rand::random);
    info!(seed, capacity = config.capacity, "starting spacecraft");

    let queue: Arc<BoundedQueue<TelemetryPacket>> = Arc::new(BoundedQueue::new(config.capacity));

    let transmitter = {
        let queue = queue.clone();
        let level = config.compression_level;
        spawn("transmitter", move || {
            let zult = transmit(&queue, &mut writer, level);
            queue.shutdown();
            zult
        })
    };

    let sensor = {
        let queue = queue.clone();
        let interval = config.sample_interval;
        let duration = config.run_duration;
        spawn("sensor", move || {
            let mut sim = TelemetrySimulator::new(seed);
            let stats = run_sensor(&queue, &mut sim, interval, duration);
            if queue.shutdown() {
                debug!(queued = queue.len(), "queue shut down; draining");
            }
            stats
        })
    };

    let sensor = join(sensor);
    let transmit = join(transmitter)?;

    Ok(SpacecraftReport {
        seed,
        sensor,
        transmit,
    })
}

/// Connect to the ground station at `addr` and run the spacecraft side over TCP.
///
/// # Errors
/// If the connection cannot be established, or any error from [run_spacecraft].
pub fn transmit_to<A: ToSocketAddrs>(config: &LinkConfig, addr: A) -> Result<SpacecraftReport> {
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    info!(peer = ?stream.peer_addr()?, "connected to ground station");
    run_spacecraft(config, stream)
}

/// Run both ends of the link in-process over loopback TCP.
///
/// `station` must already be bound, which guarantees the receiver is listening before the
/// sender connects. The simulation ends when the sensor has run for the configured duration,
/// the transmitter has drained the queue, and the ground station has seen the connection
/// close.
///
/// # Errors
/// The ground station's error if it failed, otherwise the spacecraft's.
///
/// # Panics
/// If a thread cannot be spawned. Panics in any thread are propagated.
pub fn simulate<S>(
    config: &LinkConfig,
    station: GroundStation,
    sink: S,
) -> Result<SimulationReport>
where
    S: PacketSink + Send + 'static,
{
    let addr = station.connect_addr()?;
    let max_failures = config.max_consecutive_failures;
    let ground_station = spawn("ground_station", move || {
        station.serve_one(sink, max_failures)
    });

    let spacecraft = transmit_to(config, addr);
    // The ground station only finishes once the sender's connection has been closed, which
    // is not the case if connecting failed.
    let spacecraft = match spacecraft {
        Ok(report) => report,
        Err(err) if ground_station.is_finished() => {
            join(ground_station)?;
            return Err(err);
        }
        Err(err) => return Err(err),
    };
    let ground_station = join(ground_station)?;

    info!(
        sent = spacecraft.transmit.packets,
        received = ground_station.packets,
        "simulation complete"
    );
    Ok(SimulationReport {
        spacecraft,
        ground_station,
    })
}
