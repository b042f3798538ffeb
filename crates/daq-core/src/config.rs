//! Acquisition configuration loaded with Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `DAQ_`, using `__` to nest keys
//!
//! # Example
//! ```no_run
//! use daq_core::config::AcquisitionConfig;
//!
//! let config = AcquisitionConfig::load_from("config/acquisition.toml")?;
//! config.validate()?;
//! for sensor in config.enabled_sensors() {
//!     println!("{} -> {}", sensor.name, sensor.sample_id());
//! }
//! # Ok::<(), daq_core::error::DaqError>(())
//! ```

use crate::error::DaqError;
use crate::escape::parse_backslash_sequences;
use crate::limits::{
    DATAGRAM_SCAN_BUFFER_SIZE, DEFAULT_MAX_SAMPLE_LENGTH, DRIVER_SCAN_BUFFER_SIZE,
    MAX_SAMPLE_DATA_BYTES, STREAM_SCAN_BUFFER_SIZE,
};
use crate::sample_id::SampleId;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "DAQ_";

/// Top-level configuration of an acquisition node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sensors attached to this node
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output.
    #[default]
    Pretty,
    /// Single-line output.
    Compact,
    /// JSON lines for log shippers.
    Json,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Interval between scanner statistics reports, zero disables them
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

/// One sensor: where its bytes come from, how they are framed, how they are timed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Unique sensor name used in logs
    pub name: String,
    /// Acquisition node id (10 bits)
    #[serde(default)]
    pub dsm_id: u16,
    /// Sensor+sample id (16 bits)
    pub sensor_id: u16,
    /// Whether this sensor is acquired
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Byte source
    pub source: SourceConfig,
    /// Framing settings
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// Optional time tag jitter correction
    #[serde(default)]
    pub timetag: Option<TimetagConfig>,
}

impl SensorConfig {
    /// Sample id of the samples this sensor produces.
    pub fn sample_id(&self) -> SampleId {
        SampleId::new(self.dsm_id, self.sensor_id)
    }
}

/// Where a sensor's bytes come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Serial port
    Serial {
        /// Device path, e.g. `/dev/ttyUSB0`
        path: String,
        /// Line speed
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// UDP socket receiving one message per datagram
    Udp {
        /// Local address to bind, e.g. `0.0.0.0:30010`
        bind: String,
    },
    /// File or character device read as a byte stream
    File {
        /// Path to read
        path: PathBuf,
    },
}

/// Framing discipline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingKind {
    /// Records carry a driver header with time tag and length.
    Driver,
    /// Byte stream split by fixed length and/or a separator.
    #[default]
    Stream,
    /// One sample per datagram.
    Datagram,
}

/// Byte order of driver header fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

/// Scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Framing discipline
    #[serde(default)]
    pub framing: FramingKind,
    /// Message separator with backslash escapes, empty for none
    #[serde(default)]
    pub separator: String,
    /// Separator terminates a message (true) or starts one (false)
    #[serde(default = "default_enabled")]
    pub separator_at_eom: bool,
    /// Fixed message length in bytes, read before scanning for a separator
    #[serde(default)]
    pub message_length: usize,
    /// Append a null byte to messages; defaults to on for `\r`/`\n` terminated lines
    #[serde(default)]
    pub null_terminate: Option<bool>,
    /// Serialization delay per byte used to back-correct time tags
    #[serde(default)]
    pub usecs_per_byte: i64,
    /// Driver tick length in microseconds
    #[serde(default = "default_usecs_per_tick")]
    pub usecs_per_tick: i64,
    /// Byte order of driver headers
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Largest message assembled before it is force-terminated
    #[serde(default = "default_max_sample_length")]
    pub max_sample_length: usize,
    /// Scan buffer size, framing dependent default
    #[serde(default)]
    pub buffer_size: Option<usize>,
    /// Read timeout in milliseconds, none blocks indefinitely
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            framing: FramingKind::default(),
            separator: String::new(),
            separator_at_eom: true,
            message_length: 0,
            null_terminate: None,
            usecs_per_byte: 0,
            usecs_per_tick: default_usecs_per_tick(),
            byte_order: ByteOrder::default(),
            max_sample_length: default_max_sample_length(),
            buffer_size: None,
            read_timeout_ms: None,
        }
    }
}

impl ScannerConfig {
    /// Separator as raw bytes.
    pub fn separator_bytes(&self) -> Result<Vec<u8>, DaqError> {
        parse_backslash_sequences(&self.separator)
    }

    /// Whether messages get a trailing null byte.
    pub fn null_terminate_enabled(&self) -> Result<bool, DaqError> {
        if let Some(explicit) = self.null_terminate {
            return Ok(explicit);
        }
        let sep = self.separator_bytes()?;
        Ok(matches!(sep.last(), Some(b'\r') | Some(b'\n')))
    }

    /// Scan buffer size, explicit or the framing default.
    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(match self.framing {
            FramingKind::Driver => DRIVER_SCAN_BUFFER_SIZE,
            FramingKind::Stream => STREAM_SCAN_BUFFER_SIZE,
            FramingKind::Datagram => DATAGRAM_SCAN_BUFFER_SIZE,
        })
    }

    /// Read timeout as a duration.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the framing settings.
    pub fn validate(&self) -> Result<(), DaqError> {
        if self.effective_buffer_size() == 0 {
            return Err(DaqError::Configuration("buffer_size must be positive".into()));
        }
        if self.usecs_per_byte < 0 {
            return Err(DaqError::Configuration(
                "usecs_per_byte must not be negative".into(),
            ));
        }
        match self.framing {
            FramingKind::Driver => {
                if self.usecs_per_tick <= 0 {
                    return Err(DaqError::Configuration(
                        "usecs_per_tick must be positive".into(),
                    ));
                }
            }
            FramingKind::Datagram => {}
            FramingKind::Stream => {
                let sep = self.separator_bytes()?;
                if sep.is_empty() && self.message_length == 0 {
                    return Err(DaqError::Configuration(
                        "stream framing needs a separator or a non-zero message_length".into(),
                    ));
                }
                if self.max_sample_length == 0 || self.max_sample_length > MAX_SAMPLE_DATA_BYTES
                {
                    return Err(DaqError::Configuration(format!(
                        "max_sample_length {} out of range",
                        self.max_sample_length
                    )));
                }
                let nterm = usize::from(self.null_terminate_enabled()?);
                let needed = self.message_length + sep.len() + nterm;
                if needed > self.max_sample_length {
                    return Err(DaqError::Configuration(format!(
                        "message_length {} plus separator exceeds max_sample_length {}",
                        self.message_length, self.max_sample_length
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Time tag jitter correction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimetagConfig {
    /// Nominal sample rate in Hz
    pub rate_hz: f64,
    /// Length of the adjustment window in seconds
    #[serde(default = "default_adjust_secs")]
    pub adjust_secs: f64,
    /// Gap in seconds that starts a new segment, default ten nominal periods
    #[serde(default)]
    pub max_gap_secs: Option<f64>,
}

impl TimetagConfig {
    /// Validate rates and windows.
    pub fn validate(&self) -> Result<(), DaqError> {
        if !(self.rate_hz.is_finite() && self.rate_hz > 0.0) {
            return Err(DaqError::Configuration(format!(
                "rate_hz {} must be positive",
                self.rate_hz
            )));
        }
        if !(self.adjust_secs.is_finite() && self.adjust_secs > 0.0) {
            return Err(DaqError::Configuration(format!(
                "adjust_secs {} must be positive",
                self.adjust_secs
            )));
        }
        if let Some(gap) = self.max_gap_secs {
            if !(gap.is_finite() && gap > 0.0) {
                return Err(DaqError::Configuration(format!(
                    "max_gap_secs {} must be positive",
                    gap
                )));
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_name() -> String {
    "daq-acquire".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    60
}

fn default_enabled() -> bool {
    true
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_usecs_per_tick() -> i64 {
    100
}

fn default_max_sample_length() -> usize {
    DEFAULT_MAX_SAMPLE_LENGTH
}

fn default_adjust_secs() -> f64 {
    10.0
}

impl AcquisitionConfig {
    /// Figment merging the TOML file at `path` with `DAQ_` environment overrides.
    ///
    /// Example: `DAQ_APPLICATION__LOG_LEVEL=debug`
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, DaqError> {
        Ok(Self::figment(path).extract()?)
    }

    /// Parse configuration from TOML text, without environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self, DaqError> {
        Ok(Figment::new().merge(Toml::string(text)).extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), DaqError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for sensor in &self.sensors {
            if !names.insert(sensor.name.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate sensor name: {}",
                    sensor.name
                )));
            }
            if sensor.dsm_id > 0x3ff {
                return Err(DaqError::Configuration(format!(
                    "sensor {}: dsm_id {} does not fit in 10 bits",
                    sensor.name, sensor.dsm_id
                )));
            }
            if !ids.insert(sensor.sample_id()) {
                return Err(DaqError::Configuration(format!(
                    "sensor {}: sample id {} already in use",
                    sensor.name,
                    sensor.sample_id()
                )));
            }
            sensor
                .scanner
                .validate()
                .map_err(|e| prefix_error(&sensor.name, e))?;
            if let Some(tt) = &sensor.timetag {
                tt.validate().map_err(|e| prefix_error(&sensor.name, e))?;
            }
            let datagram_source = matches!(sensor.source, SourceConfig::Udp { .. });
            let datagram_framing = sensor.scanner.framing == FramingKind::Datagram;
            if datagram_source != datagram_framing {
                return Err(DaqError::Configuration(format!(
                    "sensor {}: udp sources require datagram framing and vice versa",
                    sensor.name
                )));
            }
        }

        Ok(())
    }

    /// Get all enabled sensors
    pub fn enabled_sensors(&self) -> Vec<&SensorConfig> {
        self.sensors.iter().filter(|s| s.enabled).collect()
    }

    /// Render the effective configuration, overrides applied, as TOML.
    pub fn to_toml_string(&self) -> Result<String, DaqError> {
        toml::to_string_pretty(self)
            .map_err(|e| DaqError::Configuration(format!("cannot render configuration: {}", e)))
    }
}

fn prefix_error(sensor: &str, err: DaqError) -> DaqError {
    match err {
        DaqError::Configuration(msg) => DaqError::Configuration(format!("sensor {}: {}", sensor, msg)),
        DaqError::Parse(msg) => DaqError::Configuration(format!("sensor {}: {}", sensor, msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [application]
        name = "test-node"
        log_level = "debug"
        log_format = "json"

        [[sensors]]
        name = "gps"
        dsm_id = 1
        sensor_id = 100
        source = { kind = "serial", path = "/dev/ttyS1", baud_rate = 4800 }
        scanner = { separator = "\\r\\n", usecs_per_byte = 2083 }
        timetag = { rate_hz = 1.0 }

        [[sensors]]
        name = "sonic"
        sensor_id = 200
        source = { kind = "udp", bind = "0.0.0.0:30010" }
        scanner = { framing = "datagram" }
    "#;

    #[test]
    fn parses_and_validates() {
        let config = AcquisitionConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.application.log_format, LogFormat::Json);
        assert_eq!(config.sensors.len(), 2);

        let gps = &config.sensors[0];
        assert_eq!(gps.sample_id(), SampleId::new(1, 100));
        assert_eq!(gps.scanner.separator_bytes().unwrap(), b"\r\n".to_vec());
        assert!(gps.scanner.null_terminate_enabled().unwrap());
        assert!(gps.scanner.separator_at_eom);
        assert_eq!(gps.scanner.effective_buffer_size(), STREAM_SCAN_BUFFER_SIZE);
        assert_eq!(gps.timetag.as_ref().map(|t| t.adjust_secs), Some(10.0));

        let sonic = &config.sensors[1];
        assert_eq!(sonic.scanner.effective_buffer_size(), DATAGRAM_SCAN_BUFFER_SIZE);
    }

    #[test]
    fn stream_without_terminator_is_rejected() {
        let scanner = ScannerConfig::default();
        assert!(matches!(
            scanner.validate(),
            Err(DaqError::Configuration(_))
        ));
        let fixed = ScannerConfig {
            message_length: 12,
            ..ScannerConfig::default()
        };
        assert!(fixed.validate().is_ok());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let scanner = ScannerConfig {
            message_length: 100,
            separator: "\\n".into(),
            max_sample_length: 100,
            ..ScannerConfig::default()
        };
        assert!(scanner.validate().is_err());
    }

    #[test]
    fn null_terminate_can_be_overridden() {
        let scanner = ScannerConfig {
            separator: "\\n".into(),
            null_terminate: Some(false),
            ..ScannerConfig::default()
        };
        assert!(!scanner.null_terminate_enabled().unwrap());
        let plain = ScannerConfig {
            separator: "$".into(),
            ..ScannerConfig::default()
        };
        assert!(!plain.null_terminate_enabled().unwrap());
    }

    #[test]
    fn duplicate_sensor_names_fail_validation() {
        let mut config = AcquisitionConfig::from_toml_str(SAMPLE).unwrap();
        config.sensors[1].name = "gps".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn udp_requires_datagram_framing() {
        let mut config = AcquisitionConfig::from_toml_str(SAMPLE).unwrap();
        config.sensors[1].scanner.framing = FramingKind::Stream;
        config.sensors[1].scanner.message_length = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_rate_fails_validation() {
        let tt = TimetagConfig {
            rate_hz: 0.0,
            adjust_secs: 10.0,
            max_gap_secs: None,
        };
        assert!(tt.validate().is_err());
    }

    #[test]
    fn environment_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("node.toml", SAMPLE)?;
            jail.set_env("DAQ_APPLICATION__LOG_LEVEL", "warn");
            let config = AcquisitionConfig::load_from("node.toml")
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.application.log_level, "warn");
            assert_eq!(config.application.name, "test-node");
            Ok(())
        });
    }

    #[test]
    fn effective_configuration_renders_back_to_toml() {
        let config = AcquisitionConfig::from_toml_str(SAMPLE).unwrap();
        let text = config.to_toml_string().unwrap();
        let again = AcquisitionConfig::from_toml_str(&text).unwrap();
        assert_eq!(again.sensors.len(), 2);
        assert_eq!(again.sensors[0].source, config.sensors[0].source);
        assert_eq!(again.sensors[0].timetag, config.sensors[0].timetag);
        assert_eq!(again.sensors[1].scanner.framing, FramingKind::Datagram);
    }

    #[test]
    fn missing_file_yields_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = AcquisitionConfig::load_from("absent.toml")
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert!(config.sensors.is_empty());
            assert_eq!(config.application.log_level, "info");
            Ok(())
        });
    }
}
