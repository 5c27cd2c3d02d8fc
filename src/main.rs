//! CLI Entry Point for laser_scan
//!
//! Runs the scan or monitor session described in the configuration file against
//! the simulated bench (laser, DAQ, shutter, detectors, piezo, rotation stage).
//!
//! # Usage
//!
//! Run the configured scan:
//! ```bash
//! laser_scan --config config/laser_scan.toml scan
//! ```
//!
//! Monitor for ten reads, one every 500 ms:
//! ```bash
//! laser_scan monitor --reads 10 --interval-ms 500
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use laser_scan::config::LaserScanConfig;
use laser_scan::instrument::mock::{MockActuator, MockDaq, MockLaser};
use laser_scan::instrument::{
    Calibration, ChannelMode, DaqTrigger, Device, DeviceKind, DeviceRegistry,
};
use laser_scan::scan::{MonitorController, ScanSequencer};
use laser_scan::session::Session;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "laser_scan")]
#[command(about = "Tunable-laser scans with DAQ-synchronized acquisition", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config/laser_scan.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the [scan] section once
    Scan {
        /// Cycle the shutter before scanning
        #[arg(long)]
        sync_shutter: bool,
    },

    /// Run the [monitor] section
    Monitor {
        /// Number of reads before stopping
        #[arg(long, default_value = "5")]
        reads: u32,

        /// Wait between reads
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LaserScanConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_tracing(&config.application.log_level, cli.json);
    info!(application = %config.application.name, "Starting");

    let session = Session::new(mock_bench()?, config.timing.clone())?;
    let report = session.initialize().await?;
    for failure in &report.failures {
        warn!(error = %failure, "Device unavailable");
    }

    match cli.command {
        Commands::Scan { sync_shutter } => run_scan(session, &config, sync_shutter).await,
        Commands::Monitor { reads, interval_ms } => {
            run_monitor(session, &config, reads, Duration::from_millis(interval_ms)).await
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn mock_bench() -> Result<DeviceRegistry> {
    let mut registry = DeviceRegistry::new();
    registry.register(Device::laser("santec", Arc::new(MockLaser::new())))?;
    registry.register(Device::daq(
        "NI-DAQ",
        Arc::new(MockDaq::new()),
        DaqTrigger {
            trigger: "external".into(),
            trigger_source: "PFI0".into(),
        },
    ))?;
    registry.register(Device::daq_channel(
        "shutter",
        DeviceKind::ShutterChannel,
        "NI-DAQ",
        "port0/line1",
        ChannelMode::Output,
    ))?;
    for (name, port) in [("pd1", "ai0"), ("pd2", "ai1")] {
        registry.register(Device::daq_channel(
            name,
            DeviceKind::Detector,
            "NI-DAQ",
            port,
            ChannelMode::Input,
        ))?;
    }
    registry.register(
        Device::daq_channel("piezo", DeviceKind::Actuator, "NI-DAQ", "ao0", ChannelMode::Output)
            .with_calibration(Calibration {
                slope: 1.0,
                offset: 0.0,
                units: "V".into(),
            }),
    )?;
    registry.register(Device::actuator(
        "rotator",
        DeviceKind::RotationStage,
        Arc::new(MockActuator::new()),
    ))?;
    Ok(registry)
}

async fn run_scan(session: Arc<Session>, config: &LaserScanConfig, sync_shutter: bool) -> Result<()> {
    let spec = config
        .scan
        .clone()
        .ok_or_else(|| anyhow!("no [scan] section in the configuration"))?;
    let sequencer = Arc::new(ScanSequencer::new(session, spec)?);

    if sync_shutter {
        sequencer.sync_shutter().await?;
    }
    sequencer.setup_scan().await?;

    let stopper = Arc::clone(&sequencer);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Err(e) = stopper.stop_scan().await {
                warn!(error = %e, "Stop request failed");
            }
        }
    });

    let outcome = sequencer.do_scan().await?;
    ctrl_c.abort();

    let summary = json!({
        "run_id": outcome.run_id,
        "state": outcome.state,
        "lines": outcome.lines.len(),
        "samples": outcome.sample_count(),
        "geometry": outcome.geometry,
        "error": outcome.error.as_ref().map(|e| e.to_string()),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match outcome.error {
        Some(err) if !outcome.is_complete() && !err.is_cancellation() => Err(err.into()),
        _ => Ok(()),
    }
}

async fn run_monitor(
    session: Arc<Session>,
    config: &LaserScanConfig,
    reads: u32,
    interval: Duration,
) -> Result<()> {
    let spec = config
        .monitor
        .clone()
        .ok_or_else(|| anyhow!("no [monitor] section in the configuration"))?;
    let monitor = MonitorController::new(session, spec)?;

    monitor.setup_continuous_scans().await?;
    monitor.start_continuous_scans().await?;

    let mut totals = serde_json::Map::new();
    let result = async {
        for _ in 0..reads {
            tokio::time::sleep(interval).await;
            let samples = monitor.read_continuous_scans().await?;
            for (device, values) in samples {
                let entry = totals.entry(device).or_insert(json!(0));
                *entry = json!(entry.as_u64().unwrap_or(0) + values.len() as u64);
            }
        }
        Ok::<(), laser_scan::error::ScanError>(())
    }
    .await;
    monitor.stop_continuous_scans().await?;
    result?;

    let summary = json!({
        "state": monitor.state().await,
        "reads": reads,
        "samples": totals,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
