mod generate;

use std::{
    io::{stderr, stdout, Write},
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use telemetry::{
    compression::Level,
    link::{self, DEFAULT_PORT},
    CsvLogger, GroundStation, GroundStationConfig, LinkConfig,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options controlling the spacecraft side of the link.
#[derive(clap::Args, Debug)]
struct SpacecraftArgs {
    /// Number of packets buffered between the sensor and the transmitter.
    #[arg(short, long, default_value_t = 100)]
    capacity: usize,

    /// Milliseconds between sensor samples.
    #[arg(short, long, default_value_t = 1000, value_name = "ms")]
    interval: u64,

    /// Seconds to run the sensor before shutting down.
    #[arg(short, long, default_value_t = 10, value_name = "seconds")]
    duration: u64,

    /// Seed for sensor noise. Random if not provided.
    #[arg(long)]
    seed: Option<u64>,

    /// Zlib compression level, 0-9.
    #[arg(short, long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: u32,
}

impl SpacecraftArgs {
    fn config(&self) -> Result<LinkConfig> {
        if self.capacity == 0 {
            bail!("--capacity must be at least 1");
        }
        if self.interval == 0 {
            bail!("--interval must be at least 1ms");
        }
        let mut config = LinkConfig::builder()
            .capacity(self.capacity)
            .sample_interval(Duration::from_millis(self.interval))
            .run_duration(Duration::from_secs(self.duration))
            .compression_level(Level::new(self.level))
            .build();
        config.seed = self.seed;
        Ok(config)
    }
}

/// Options controlling the ground station side of the link.
#[derive(clap::Args, Debug)]
struct GroundStationArgs {
    /// Directory for CSV telemetry logs.
    #[arg(long, default_value = "logs", value_name = "path")]
    log_dir: PathBuf,

    /// Log file name within --log-dir. Defaults to telemetry_<unix-seconds>.csv
    #[arg(long, value_name = "name")]
    log_file: Option<String>,

    /// Give up on a connection after this many undecodable messages in a row. Zero
    /// disables the limit.
    #[arg(long, default_value_t = 8)]
    max_failures: usize,
}

impl GroundStationArgs {
    fn config(&self, bind: SocketAddr) -> GroundStationConfig {
        GroundStationConfig::builder()
            .bind(bind)
            .log_dir(self.log_dir.clone())
            .log_file(self.log_file.clone().unwrap_or_else(link::default_log_file))
            .build()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sensor, transmitter, and ground station in one process over loopback TCP.
    ///
    /// The ground station is bound before the transmitter connects. After --duration the
    /// queue is shut down, remaining packets are sent, and the connection is closed.
    Simulate {
        #[command(flatten)]
        spacecraft: SpacecraftArgs,

        #[command(flatten)]
        station: GroundStationArgs,

        /// Ground station bind address. Port 0 picks a free port.
        #[arg(short, long, default_value = "127.0.0.1:0", value_name = "addr")]
        bind: SocketAddr,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,
    },
    /// Receive telemetry from a single transmitter and log it to CSV.
    GroundStation {
        #[command(flatten)]
        station: GroundStationArgs,

        /// Bind address.
        #[arg(short, long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)), value_name = "addr")]
        bind: SocketAddr,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,
    },
    /// Simulate the spacecraft and transmit to a running ground station.
    Transmit {
        #[command(flatten)]
        spacecraft: SpacecraftArgs,

        /// Ground station address.
        #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)), value_name = "addr")]
        addr: SocketAddr,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,
    },
    /// Print simulated packets without any networking.
    Generate {
        /// Number of packets to generate.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Seconds of simulated time between packets.
        #[arg(long, default_value_t = 1.0, value_name = "seconds")]
        dt: f64,

        /// Seed for sensor noise. Random if not provided.
        #[arg(long)]
        seed: Option<u64>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,
    },
}

fn report<T>(value: &T, format: &Format) -> Result<()>
where
    T: Serialize + std::fmt::Display,
{
    let mut out = stdout().lock();
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut out, value).context("serializing report")?;
            writeln!(out)?;
        }
        Format::Text => writeln!(out, "{value}")?,
    }
    Ok(())
}

fn open_log(config: &GroundStationConfig) -> Result<CsvLogger<std::io::BufWriter<std::fs::File>>> {
    info!(
        "logging telemetry to {:?}",
        config.log_dir.join(&config.log_file)
    );
    CsvLogger::create(&config.log_dir, &config.log_file).with_context(|| {
        format!(
            "failed to open log {:?}",
            config.log_dir.join(&config.log_file)
        )
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("TELEMETRY_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Simulate {
            spacecraft,
            station,
            bind,
            format,
        } => {
            let mut config = spacecraft.config()?;
            config.max_consecutive_failures = station.max_failures;
            let station_config = station.config(*bind);
            let logger = open_log(&station_config)?;
            let server = GroundStation::bind(station_config.bind)
                .with_context(|| format!("failed to bind {}", station_config.bind))?;

            let zult = link::simulate(&config, server, logger).context("simulation failed")?;
            report(&zult, format)
        }
        Commands::GroundStation {
            station,
            bind,
            format,
        } => {
            let config = station.config(*bind);
            let logger = open_log(&config)?;
            let server = GroundStation::bind(config.bind)
                .with_context(|| format!("failed to bind {}", config.bind))?;

            let zult = server
                .serve_one(logger, station.max_failures)
                .context("ground station failed")?;
            report(&zult, format)
        }
        Commands::Transmit {
            spacecraft,
            addr,
            format,
        } => {
            let config = spacecraft.config()?;
            let zult = link::transmit_to(&config, addr)
                .with_context(|| format!("failed to transmit to {addr}"))?;
            report(&zult, format)
        }
        Commands::Generate {
            count,
            dt,
            seed,
            format,
        } => {
            if !dt.is_finite() || *dt < 0.0 {
                bail!("--dt must be a non-negative number of seconds");
            }
            generate::generate(*count, *dt, *seed, format)
        }
    }
}
