//! # Yarbo Link
//!
//! Command-line front end for the Yarbo telemetry core.
//!
//! # Commands
//!
//! - `replay <trace.jsonl>` feeds recorded inbound telemetry through a
//!   coordinator (dry-run transport), paced by the recorded timestamps.
//!   Detected events and issues are logged.
//! - `gngga <sentence>` parses one GNGGA sentence and prints the fix.
//!
//! Logging goes to stderr; `RUST_LOG` refines the default level, `--debug`
//! raises it to `debug`. The filter sits behind a reload handle, so the
//! coordinator's `debug_logging` option can change it while running.
//!
//! # Examples
//!
//! ```bash
//! yarbo-link --config config/yarbo.toml replay recordings/yarbo_L8HO5227_20260301_120000.jsonl --speed 10
//! yarbo-link gngga '$GNGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47'
//! ```

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload};

use yarbo_link::config::Config;
use yarbo_link::coordinator::{Coordinator, TelemetryItem, WatchStateSink, TELEMETRY_TOPIC};
use yarbo_link::events::LoggingEventSink;
use yarbo_link::gateway::DryRunTransport;
use yarbo_link::logging::{env_filter, ReloadLogControl};
use yarbo_link::recorder::{Direction, TraceEntry};
use yarbo_link::registry::DeviceRegistry;
use yarbo_link::repairs::LoggingIssueSink;
use yarbo_link::telemetry::{parse_gngga, TelemetrySnapshot};

/// Depth of the replay telemetry channel
const TELEMETRY_QUEUE_DEPTH: usize = 64;

/// Device id used when neither config nor trace names one
const FALLBACK_DEVICE_ID: &str = "replay";

#[derive(Debug, Parser)]
#[command(name = "yarbo-link", version, about = "Yarbo robot telemetry and command core")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Re-feed recorded telemetry through a coordinator
    Replay {
        file: PathBuf,
        /// Playback speed factor (2.0 = twice as fast)
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },
    /// Parse a GNGGA sentence and print the fix as JSON
    Gngga { sentence: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (_log_guard, log_control) = init_logging(cli.debug);

    info!("Yarbo Link v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.cmd {
        Cmd::Gngga { sentence } => {
            let Some(fix) = parse_gngga(&sentence) else {
                bail!("not a GNGGA sentence (need at least 10 fields)");
            };
            println!("{}", serde_json::to_string_pretty(&fix)?);
        }
        Cmd::Replay { file, speed } => replay(cli.config.as_deref(), &file, speed, log_control).await?,
    }

    Ok(())
}

/// Install the stderr subscriber. The guard must live until exit.
fn init_logging(debug: bool) -> (WorkerGuard, ReloadLogControl) {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let (filter, handle) = reload::Layer::new(env_filter(debug));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer))
        .init();
    (guard, ReloadLogControl::new(handle))
}

async fn replay(config_path: Option<&Path>, file: &Path, speed: f64, log_control: ReloadLogControl) -> Result<()> {
    if !speed.is_finite() || speed <= 0.0 {
        bail!("speed must be a positive number, got {}", speed);
    }

    let entries = read_trace(file).with_context(|| format!("Failed to read trace {}", file.display()))?;
    let config = match config_path {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::for_device(trace_serial(&entries).unwrap_or(FALLBACK_DEVICE_ID)),
    };

    let samples = telemetry_samples(&entries);
    info!(
        "Replaying {} telemetry samples for {} at {}x",
        samples.len(),
        config.device.id,
        speed
    );

    let (state_sink, _state_rx) = WatchStateSink::new();
    let coordinator = Coordinator::from_config(
        &config,
        Arc::new(DryRunTransport::new(FALLBACK_DEVICE_ID)),
        Arc::new(LoggingIssueSink),
        Arc::new(state_sink),
        Arc::new(LoggingEventSink),
    );
    coordinator.set_log_control(Arc::new(log_control));
    let registry = DeviceRegistry::new();
    registry.register(coordinator.clone());

    let (tx, rx) = mpsc::channel(TELEMETRY_QUEUE_DEPTH);
    coordinator.start(rx)?;

    tokio::select! {
        sent = feed(samples, speed, tx) => {
            info!("Sent {} samples", sent);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    if let Err(e) = coordinator.wait().await {
        warn!("Ingestion ended with error: {}", e);
    }
    info!("Accepted {} updates", coordinator.update_count());

    registry.teardown_all().await;
    Ok(())
}

/// Send samples, sleeping for the recorded gap divided by `speed`.
async fn feed(samples: Vec<(DateTime<Utc>, TelemetrySnapshot)>, speed: f64, tx: mpsc::Sender<TelemetryItem>) -> usize {
    let mut previous: Option<DateTime<Utc>> = None;
    let mut sent = 0;

    for (ts, snapshot) in samples {
        if let Some(prev) = previous {
            let gap = pace(prev, ts, speed);
            if !gap.is_zero() {
                tokio::time::sleep(gap).await;
            }
        }
        previous = Some(ts);

        if tx.send(Ok(snapshot)).await.is_err() {
            debug!("Coordinator stopped consuming");
            break;
        }
        sent += 1;
    }
    sent
}

/// Delay between two recorded timestamps at `speed`; never negative.
fn pace(previous: DateTime<Utc>, next: DateTime<Utc>, speed: f64) -> Duration {
    let gap = (next - previous).to_std().unwrap_or(Duration::ZERO);
    Duration::try_from_secs_f64(gap.as_secs_f64() / speed).unwrap_or(Duration::MAX)
}

/// Parse a trace file, skipping lines that are not valid entries.
fn read_trace(path: &Path) -> Result<Vec<TraceEntry>> {
    let contents = fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TraceEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("Skipping line {}: {}", number + 1, e),
        }
    }
    Ok(entries)
}

/// Serial from the first recording-start marker
fn trace_serial(entries: &[TraceEntry]) -> Option<&str> {
    entries
        .iter()
        .find(|e| e.dir == Direction::Meta && e.topic == "recording_start")
        .and_then(|e| e.payload.get("serial"))
        .and_then(|v| v.as_str())
}

/// Inbound telemetry entries decoded into snapshots
fn telemetry_samples(entries: &[TraceEntry]) -> Vec<(DateTime<Utc>, TelemetrySnapshot)> {
    entries
        .iter()
        .filter(|e| e.dir == Direction::Rx && e.topic == TELEMETRY_TOPIC)
        .filter_map(|e| {
            let payload = e.payload.as_object()?.clone();
            Some((e.ts, TelemetrySnapshot::from_payload(payload)))
        })
        .collect()
}
