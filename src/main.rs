//! CLI entry point for kcsdr
//!
//! Provides command-line interface for:
//! - Listing attached receivers
//! - Capturing a bounded number of frames and summarising them
//!
//! The binary drives the simulated receiver backend; hardware backends plug
//! in through `kcsdr_source::ReceiverDriver`.
//!
//! # Usage
//!
//! ```bash
//! kcsdr list
//! kcsdr capture --frames 20 --frequency 433.92e6 --if-gain 20
//! KCSDR_APPLICATION__LOG_FORMAT=json kcsdr capture
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use kcsdr::capture::capture;
use kcsdr::config::{AppConfig, DEFAULT_CONFIG_PATH};
use kcsdr::tracing_init;
use kcsdr_source::mock::{MockConfig, MockDriver, MockReceiver, SamplePattern};
use kcsdr_source::{DeviceId, KcsdrSource, NullHost, ReceiverDriver};
use tracing::info;

#[derive(Parser)]
#[command(name = "kcsdr")]
#[command(about = "Continuous acquisition for KC908-class SDR receivers", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached receivers
    List,

    /// Capture a number of frames and print a summary per frame
    Capture {
        /// Frames to capture
        #[arg(long, default_value = "10")]
        frames: u64,

        /// Center frequency in Hz
        #[arg(long)]
        frequency: Option<f64>,

        /// Receiver serial (defaults to the first one)
        #[arg(long)]
        serial: Option<String>,

        /// External amplifier level
        #[arg(long, allow_hyphen_values = true)]
        amplifier: Option<i32>,

        /// Attenuation level
        #[arg(long, allow_hyphen_values = true)]
        attenuation: Option<i32>,

        /// IF gain level
        #[arg(long, allow_hyphen_values = true)]
        if_gain: Option<i32>,

        /// Seconds to wait for each frame
        #[arg(long, default_value = "5")]
        timeout: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.validate().map_err(|e| anyhow!(e))?;
    tracing_init::init_from_config(&config).map_err(|e| anyhow!(e))?;

    info!(name = %config.application.name, "kcsdr starting");

    let driver: Arc<dyn ReceiverDriver> = Arc::new(simulated_driver());

    match cli.command {
        Commands::List => list(&config, driver),
        Commands::Capture {
            frames,
            frequency,
            serial,
            amplifier,
            attenuation,
            if_gain,
            timeout,
        } => {
            let mut source = KcsdrSource::new(
                config.application.name.clone(),
                driver,
                Arc::new(NullHost),
                config.source.clone(),
            )?;

            if let Some(serial) = serial {
                source.select_device(&DeviceId::new(serial))?;
            }
            if let Some(hz) = frequency {
                source.tune(hz.max(0.0).round() as u64)?;
            }
            if let Some(level) = amplifier {
                println!("Amplifier: {}", source.set_amplifier(level)?);
            }
            if let Some(level) = attenuation {
                println!("Attenuation: {}", source.set_attenuation(level)?);
            }
            if let Some(level) = if_gain {
                println!("IF gain: {}", source.set_if_gain(level)?);
            }

            let report = capture(
                &mut source,
                config.stream,
                frames,
                Duration::from_secs(timeout),
            )?;

            for frame in &report.frames {
                println!(
                    "frame {:>6}  {:>9} samples  {:>7.2} dBFS",
                    frame.sequence, frame.samples, frame.power_dbfs
                );
            }
            if let Some(stats) = report.stats {
                println!();
                println!(
                    "{} blocks, {} frames, {} read misses in {:.3?} ({:.1} frames/s)",
                    stats.blocks_read,
                    stats.frames_delivered,
                    stats.read_misses,
                    stats.elapsed,
                    stats.frame_rate()
                );
            }
            Ok(())
        }
    }
}

fn list(config: &AppConfig, driver: Arc<dyn ReceiverDriver>) -> Result<()> {
    let source = KcsdrSource::new(
        config.application.name.clone(),
        driver,
        Arc::new(NullHost),
        config.source.clone(),
    )?;

    let devices = source.list_devices();
    if devices.is_empty() {
        println!("No receivers found");
    }
    for (name, id) in devices {
        let marker = if source.selected().is_some_and(|d| d.id() == id) {
            "*"
        } else {
            " "
        };
        println!("{} {}  (id: {})", marker, name, id);
    }
    Ok(())
}

fn simulated_driver() -> MockDriver {
    let driver = MockDriver::new();
    driver.plug(
        MockReceiver::kc908_descriptor("SIM0001"),
        MockConfig {
            pattern: SamplePattern::Constant { i: 2048, q: -2048 },
            misses_per_read: 2,
            read_delay: Duration::from_micros(200),
        },
    );
    driver
}
