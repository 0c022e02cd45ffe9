//! CLI Entry Point for wave_daq
//!
//! Provides command-line interface for:
//! - Running an acquisition session against the configured frame source
//! - Checking a configuration file without starting anything
//!
//! # Usage
//!
//! Run a simulated session for 30 seconds:
//! ```bash
//! wave_daq simulate --config config/acquisition.toml --duration 30
//! ```
//!
//! Validate a configuration:
//! ```bash
//! wave_daq check-config config/acquisition.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wave_daq::acquisition::{AcquisitionEvent, AcquisitionOrchestrator};
use wave_daq::config::AcquisitionConfig;
use wave_daq::logging;

#[derive(Parser)]
#[command(name = "wave_daq")]
#[command(about = "Real-time wave probe acquisition and analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an acquisition session and print its summary
    Simulate {
        /// Configuration file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stop after this many seconds if the source has not finished
        #[arg(long, default_value = "10")]
        duration: f64,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate { config, duration } => simulate(config, duration),
        Commands::CheckConfig { file } => check_config(file),
    }
}

fn load(path: Option<&PathBuf>) -> Result<AcquisitionConfig> {
    let config = match path {
        Some(path) => AcquisitionConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AcquisitionConfig::default(),
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn simulate(path: Option<PathBuf>, duration: f64) -> Result<()> {
    let config = load(path.as_ref())?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    let duration = Duration::try_from_secs_f64(duration)
        .with_context(|| format!("Invalid duration {}", duration))?;

    let mut orchestrator = AcquisitionOrchestrator::new();
    orchestrator.register_observer(Arc::new(|event: &AcquisitionEvent| match event {
        AcquisitionEvent::Wave(result) => info!(
            hm0 = result.statistics.incident_hm0,
            kr = result.statistics.reflection_coefficient,
            tp = result.statistics.peak_period,
            excluded = result.excluded_bin_count(),
            "Wave block"
        ),
        AcquisitionEvent::Stats(stats) => info!(
            fill = stats.fill_percent,
            overflow = stats.overflow_count,
            throughput = stats.throughput_sps,
            "Buffer"
        ),
        _ => {}
    }));

    orchestrator.configure(config)?;
    orchestrator.start()?;
    if !orchestrator.wait_until_finished(duration) {
        info!(seconds = duration.as_secs_f64(), "Duration reached, stopping");
    }

    let summary = match orchestrator.stop() {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(summary) = orchestrator.last_summary() {
                println!("{}", serde_json::to_string_pretty(summary)?);
            }
            return Err(e.into());
        }
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn check_config(file: PathBuf) -> Result<()> {
    let config = load(Some(&file))?;
    println!("✅ {} is valid", file.display());
    println!("   Session:  {}", config.session.name);
    println!(
        "   Buffer:   {} channels @ {} Hz, capacity {}, blocks of {}",
        config.buffer.channels,
        config.buffer.sample_rate,
        config.buffer.capacity,
        config.buffer.block_size
    );
    println!(
        "   Spectral: {} window, length {}",
        config.spectral.window.name(),
        config.spectral.window_length
    );
    match &config.wave {
        Some(wave) => println!(
            "   Wave:     {} probes, depth {} m, geometry {}",
            wave.geometry.len(),
            wave.depth,
            wave.geometry.key()
        ),
        None => println!("   Wave:     disabled"),
    }
    println!("   Source:   {}", config.orchestrator.source.kind());
    Ok(())
}
