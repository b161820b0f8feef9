//! Simulated spacecraft sensors.
//!
//! Each sensor owns its state and is advanced once per tick by [TelemetrySimulator], which
//! threads a single seeded random source through every sensor so a run is reproducible from
//! its seed.
use std::f32::consts::PI;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::TelemetryPacket;

/// Sample zero-mean gaussian noise with the given standard deviation.
fn noise<R: Rng>(rng: &mut R, std_dev: f32) -> f32 {
    let z: f32 = rng.sample(StandardNormal);
    z * std_dev
}

#[derive(Debug, Clone)]
pub struct TemperatureSensor {
    temperature: f32,
    cooling_rate: f32,
}

impl TemperatureSensor {
    pub const MIN: f32 = -50.0;
    pub const MAX: f32 = 80.0;
    const NOISE: f32 = 0.05;

    pub fn new(initial: f32, cooling_rate: f32) -> Self {
        TemperatureSensor {
            temperature: initial,
            cooling_rate,
        }
    }

    pub fn update<R: Rng>(&mut self, dt: f64, rng: &mut R) {
        let next = self.temperature + self.cooling_rate * dt as f32 + noise(rng, Self::NOISE);
        self.temperature = next.clamp(Self::MIN, Self::MAX);
    }

    pub fn value(&self) -> f32 {
        self.temperature
    }
}

impl Default for TemperatureSensor {
    fn default() -> Self {
        Self::new(25.0, -0.005)
    }
}

/// Radiation level, which rises with distance from the orbital plane.
#[derive(Debug, Clone)]
pub struct RadiationSensor {
    radiation: f32,
}

impl RadiationSensor {
    const BASE: f32 = 0.05;
    const PER_KM: f32 = 0.0001;
    const NOISE: f32 = 0.002;

    pub fn new(initial: f32) -> Self {
        RadiationSensor { radiation: initial }
    }

    /// Update from the current out-of-plane position `z` in km.
    pub fn update<R: Rng>(&mut self, z: f32, rng: &mut R) {
        let base = Self::BASE + Self::PER_KM * z;
        self.radiation = (base + noise(rng, Self::NOISE)).max(0.0);
    }

    pub fn value(&self) -> f32 {
        self.radiation
    }
}

impl Default for RadiationSensor {
    fn default() -> Self {
        Self::new(0.1)
    }
}

#[derive(Debug, Clone)]
pub struct BatterySensor {
    voltage: f32,
    discharge_rate: f32,
}

impl BatterySensor {
    pub const MIN: f32 = 9.0;
    pub const MAX: f32 = 12.6;
    const NOISE: f32 = 0.002;

    pub fn new(initial: f32, discharge_rate: f32) -> Self {
        BatterySensor {
            voltage: initial,
            discharge_rate,
        }
    }

    pub fn update<R: Rng>(&mut self, dt: f64, rng: &mut R) {
        let next = self.voltage - self.discharge_rate * dt as f32 + noise(rng, Self::NOISE);
        self.voltage = next.clamp(Self::MIN, Self::MAX);
    }

    pub fn value(&self) -> f32 {
        self.voltage
    }
}

impl Default for BatterySensor {
    fn default() -> Self {
        Self::new(12.5, 0.0001)
    }
}

/// Position on a circular equatorial orbit.
#[derive(Debug, Clone, Default)]
pub struct PositionSensor {
    elapsed: f64,
}

impl PositionSensor {
    /// Orbit radius in km
    pub const RADIUS: f32 = 7000.0;
    /// Orbital period in seconds
    pub const PERIOD: f32 = 5400.0;

    pub fn update(&mut self, dt: f64) {
        self.elapsed += dt;
    }

    pub fn value(&self) -> [f32; 3] {
        let omega = 2.0 * PI / Self::PERIOD;
        let angle = omega * self.elapsed as f32;
        [Self::RADIUS * angle.cos(), Self::RADIUS * angle.sin(), 0.0]
    }
}

/// Pitch, roll, and yaw random walk in degrees.
#[derive(Debug, Clone, Default)]
pub struct OrientationSensor {
    angles: [f32; 3],
}

impl OrientationSensor {
    const NOISE: [f32; 3] = [0.01, 0.01, 0.02];

    /// Wrap an angle into [-180, 180).
    fn wrap(angle: f32) -> f32 {
        let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
        // rem_euclid may round up to exactly 360
        if wrapped >= 180.0 {
            wrapped - 360.0
        } else {
            wrapped
        }
    }

    pub fn update<R: Rng>(&mut self, rng: &mut R) {
        for (angle, std_dev) in self.angles.iter_mut().zip(Self::NOISE) {
            *angle = Self::wrap(*angle + noise(rng, std_dev));
        }
    }

    pub fn value(&self) -> [f32; 3] {
        self.angles
    }
}

/// Generates one [TelemetryPacket] per simulation tick from the full set of sensors.
///
/// # Example
/// ```
/// use telemetry::TelemetrySimulator;
///
/// let mut sim = TelemetrySimulator::new(42);
/// let first = sim.generate_packet(1.0);
/// let second = sim.generate_packet(1.0);
/// assert_eq!(first.timestamp, 1);
/// assert_eq!(second.timestamp, 2);
/// ```
#[derive(Debug, Clone)]
pub struct TelemetrySimulator {
    seed: u64,
    rng: ChaCha8Rng,
    tick: u64,
    temperature: TemperatureSensor,
    radiation: RadiationSensor,
    battery: BatterySensor,
    position: PositionSensor,
    orientation: OrientationSensor,
}

impl TelemetrySimulator {
    /// Create a simulator whose noise is derived entirely from `seed`.
    pub fn new(seed: u64) -> Self {
        TelemetrySimulator {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            tick: 0,
            temperature: TemperatureSensor::default(),
            radiation: RadiationSensor::default(),
            battery: BatterySensor::default(),
            position: PositionSensor::default(),
            orientation: OrientationSensor::default(),
        }
    }

    /// Create a simulator with a randomly chosen seed, available from [Self::seed].
    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of packets generated so far.
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Advance every sensor by `dt` seconds and return the resulting packet.
    ///
    /// Timestamps start at 1 and increase by one per call, so a generated packet is never
    /// mistaken for [TelemetryPacket::SENTINEL].
    pub fn generate_packet(&mut self, dt: f64) -> TelemetryPacket {
        self.tick += 1;

        self.temperature.update(dt, &mut self.rng);
        self.position.update(dt);
        self.radiation.update(self.position.value()[2], &mut self.rng);
        self.orientation.update(&mut self.rng);
        self.battery.update(dt, &mut self.rng);

        TelemetryPacket {
            timestamp: self.tick,
            temperature: self.temperature.value(),
            radiation: self.radiation.value(),
            battery_voltage: self.battery.value(),
            position: self.position.value(),
            orientation: self.orientation.value(),
        }
    }
}
