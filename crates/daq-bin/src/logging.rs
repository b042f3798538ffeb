//! Tracing setup for the acquisition daemon.
//!
//! Structured events from every crate go through `tracing`; this module installs
//! the `tracing-subscriber` formatter chosen in `[application]`:
//! - `pretty`: multi-line, colored (development)
//! - `compact`: one line per event (production)
//! - `json`: JSON lines (log shippers)
//!
//! `RUST_LOG` overrides the configured level. Output goes to stderr so stdout stays
//! free for command results.
//!
//! # Example
//! ```no_run
//! use daq_bin::logging::{self, TracingConfig};
//! use daq_core::config::LogFormat;
//! use tracing::Level;
//!
//! logging::init(TracingConfig::new(Level::DEBUG).with_format(LogFormat::Json))?;
//! tracing::info!(sensor = "gps", "Acquisition started");
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use daq_core::config::{ApplicationConfig, LogFormat};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format
    pub format: LogFormat,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to include thread names
    pub with_thread_names: bool,
    /// Whether to enable ANSI colors (pretty format only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Tracing config from the `[application]` section.
    pub fn from_app_config(app: &ApplicationConfig) -> Result<Self> {
        Ok(Self {
            level: parse_log_level(&app.log_level)?,
            format: app.log_format,
            ..Default::default()
        })
    }

    /// Tracing config at `level` with defaults otherwise.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed this returns `Ok(())`.
pub fn init(config: TracingConfig) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_names(config.with_thread_names);
    let layer = match config.format {
        LogFormat::Pretty => base.pretty().with_ansi(config.with_ansi).boxed(),
        LogFormat::Compact => base.compact().with_ansi(false).boxed(),
        LogFormat::Json => base.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            if tracing::dispatcher::has_been_set() {
                Ok(())
            } else {
                Err(anyhow!("Failed to initialize tracing: {e}"))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )),
    }
}
