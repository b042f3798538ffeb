//! CLI entry point of the acquisition daemon.
//!
//! Acquire from every enabled sensor:
//! ```bash
//! daq-acquire run --config config/acquisition.toml
//! ```
//!
//! Validate a configuration without opening any device:
//! ```bash
//! daq-acquire check --config config/acquisition.toml
//! ```
//!
//! Settings may be overridden from the environment, e.g.
//! `DAQ_APPLICATION__LOG_LEVEL=debug`.

// Global allocator: samples are allocated and recycled from many sensor threads
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use daq_bin::clients::{CountingClient, LogClient};
use daq_bin::logging::{self, TracingConfig};
use daq_bin::{PipelineSummary, SensorPipeline};
use daq_core::config::{AcquisitionConfig, LogFormat};
use daq_core::{DaqError, SampleClock, SystemClock};
use daq_distribution::{SampleClient, SampleSource};
use daq_pool::PoolRegistry;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "daq-acquire")]
#[command(about = "Acquire, frame and distribute sensor samples", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire from every enabled sensor until interrupted or every source ends
    Run {
        /// Configuration file (TOML format)
        #[arg(long, short)]
        config: PathBuf,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Override the configured log format
        #[arg(long, value_enum)]
        log_format: Option<LogFormatArg>,
    },

    /// Validate a configuration file and list its sensors
    Check {
        /// Configuration file (TOML format)
        #[arg(long, short)]
        config: PathBuf,

        /// Print the effective configuration with environment overrides applied
        #[arg(long)]
        print: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            duration,
            log_format,
        } => {
            run(
                &config,
                duration.map(Duration::from_secs),
                log_format.map(LogFormat::from),
            )
            .await
        }
        Commands::Check { config, print } => check(&config, print),
    }
}

fn load_config(path: &Path) -> Result<AcquisitionConfig> {
    if !path.is_file() {
        bail!("Configuration file not found: {}", path.display());
    }
    let config = AcquisitionConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

fn check(path: &Path, print: bool) -> Result<()> {
    let config = load_config(path)?;
    if print {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }
    println!("Configuration OK: {}", path.display());
    for sensor in &config.sensors {
        println!(
            "  {} id={} framing={:?}{}",
            sensor.name,
            sensor.sample_id(),
            sensor.scanner.framing,
            if sensor.enabled { "" } else { " (disabled)" }
        );
    }
    Ok(())
}

type PipelineResult = std::result::Result<PipelineSummary, (String, DaqError)>;

async fn run(path: &Path, duration: Option<Duration>, log_format: Option<LogFormat>) -> Result<()> {
    let config = load_config(path)?;
    let mut tracing_config = TracingConfig::from_app_config(&config.application)?;
    if let Some(format) = log_format {
        tracing_config = tracing_config.with_format(format);
    }
    logging::init(tracing_config)?;

    let sensors = config.enabled_sensors();
    if sensors.is_empty() {
        bail!("No enabled sensors in {}", path.display());
    }
    info!(
        application = %config.application.name,
        sensors = sensors.len(),
        "Starting acquisition"
    );

    let registry = PoolRegistry::new();
    let clock: Arc<dyn SampleClock> = Arc::new(SystemClock::default());
    let distributor = Arc::new(SampleSource::<u8>::new());
    distributor.set_keep_stats(true);
    let counter = Arc::new(CountingClient::default());
    let counter_client: Arc<dyn SampleClient<u8>> = counter.clone();
    let log_client: Arc<dyn SampleClient<u8>> = Arc::new(LogClient);
    distributor.subscribe_all(&counter_client);
    distributor.subscribe_all(&log_client);

    // open every sensor before starting any, so a bad device aborts cleanly
    let mut pipelines = Vec::with_capacity(sensors.len());
    for sensor in sensors {
        let pipeline = SensorPipeline::from_config(
            sensor,
            &config.application,
            registry.pool::<u8>(),
            Arc::clone(&clock),
            Arc::clone(&distributor),
        )
        .with_context(|| format!("Failed to start sensor {}", sensor.name))?;
        pipelines.push(pipeline);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut tasks: JoinSet<PipelineResult> = JoinSet::new();
    for pipeline in pipelines {
        let stop = Arc::clone(&stop);
        tasks.spawn_blocking(move || {
            let name = pipeline.name().to_string();
            pipeline.run(&stop).map_err(|e| (name, e))
        });
    }

    let deadline = duration.map(|d| Instant::now() + d);
    let mut summaries = Vec::new();
    let mut failures = 0usize;
    let mut stopping = false;
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok(Ok(summary))) => summaries.push(summary),
                Some(Ok(Err((sensor, e)))) => {
                    error!(sensor = %sensor, error = %e, "Sensor pipeline failed");
                    failures += 1;
                }
                Some(Err(e)) => {
                    error!(error = %e, "Sensor task panicked");
                    failures += 1;
                }
            },
            _ = signal::ctrl_c(), if !stopping => {
                info!("Interrupt received, stopping sensors");
                stopping = true;
                stop.store(true, Ordering::Relaxed);
            }
            _ = wait_until(deadline), if !stopping && deadline.is_some() => {
                info!("Run duration elapsed, stopping sensors");
                stopping = true;
                stop.store(true, Ordering::Relaxed);
            }
        }
    }

    distributor.flush();
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    for summary in &summaries {
        println!(
            "{}: {} samples, {} bytes",
            summary.name, summary.samples, summary.bytes
        );
    }

    let published = distributor.stats();
    info!(
        published = published.samples,
        bytes = published.bytes,
        received = counter.samples(),
        "Distribution totals"
    );
    for stats in registry.stats() {
        info!(
            element_type = %stats.element_type,
            allocated = stats.allocated,
            checked_out = stats.checked_out,
            free = stats.free(),
            "Sample pool"
        );
    }
    distributor.remove_client(&counter_client);
    distributor.remove_client(&log_client);
    let freed = registry.drain_all();
    debug!(freed, "Drained sample pools");

    if failures > 0 {
        bail!("{failures} sensor pipeline(s) failed");
    }
    Ok(())
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
