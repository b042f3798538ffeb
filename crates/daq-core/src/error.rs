//! Error type shared by every crate of the acquisition pipeline.
//!
//! `DaqError` follows the error taxonomy of the pipeline:
//!
//! - **`Io`**: read, permission or disconnect failures from a sensor source. These are
//!   propagated to the caller of a scanner fill and never retried inside the core.
//! - **`Timeout`**: a bounded read expired with no data. Callers use this to tell
//!   "no data yet" apart from a broken device.
//! - **`LengthExceeded`** / **`SampleTooLarge`**: capacity violations in the sample and
//!   pool layer. Fatal to the single operation, never silently truncated.
//! - **`Configuration`** / **`Config`**: rejected settings, detected before acquisition
//!   starts (for example a stream scanner with neither a separator nor a length).
//! - **`Parse`**: malformed textual settings such as a bad backslash escape in a
//!   separator string.
//!
//! Framing anomalies (oversized messages, bad hardware time tags) are not errors at all:
//! scanners recover locally and only bump a counter.

use thiserror::Error;

/// Convenience alias used throughout the library crates.
pub type Result<T> = std::result::Result<T, DaqError>;

/// Primary error type for the acquisition pipeline.
///
/// # Example
///
/// ```rust
/// use daq_core::error::DaqError;
///
/// fn check_rate(rate_hz: f64) -> Result<(), DaqError> {
///     if rate_hz <= 0.0 {
///         return Err(DaqError::Configuration("rate_hz must be positive".into()));
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file could not be loaded or deserialized.
    ///
    /// **Error Type**: Permanent - requires fixing the configuration file.
    ///
    /// **Source**: Wraps `figment::Error` (TOML syntax, type mismatch, missing field).
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values parsed but failed semantic validation.
    ///
    /// **Error Type**: Permanent - requires fixing the configuration values.
    ///
    /// **Recovery Strategy**: Abort startup, display validation error message.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation on a sensor source failed.
    ///
    /// **Error Type**: Usually permanent for the device (disconnect, permission denied).
    ///
    /// **Recovery Strategy**: Owned by the sensor's collaborator; the core does not retry.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded read on `device` expired before any data arrived.
    ///
    /// **Error Type**: Transient - the device may simply be quiet.
    #[error("Timeout reading from {device}")]
    Timeout {
        /// Name of the sensor source that timed out.
        device: String,
    },

    /// A requested sample length exceeds the allocated capacity of the sample.
    ///
    /// Callers must `grow()` the sample before setting a longer length.
    #[error("Sample length {requested} exceeds allocated length {allocated}")]
    LengthExceeded {
        /// Requested length in elements.
        requested: usize,
        /// Allocated capacity in elements.
        allocated: usize,
    },

    /// A sample allocation request exceeds the largest representable frame.
    #[error("Requested sample of {requested} elements exceeds maximum of {max}")]
    SampleTooLarge {
        /// Requested length in elements.
        requested: usize,
        /// Maximum length in elements for the element type.
        max: usize,
    },

    /// Textual setting could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

impl DaqError {
    /// Returns true for the timeout condition, which callers usually treat as "try again".
    pub fn is_timeout(&self) -> bool {
        matches!(self, DaqError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinct_from_io() {
        let timeout = DaqError::Timeout {
            device: "gps".into(),
        };
        let io = DaqError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "unplugged",
        ));
        assert!(timeout.is_timeout());
        assert!(!io.is_timeout());
        assert_eq!(timeout.to_string(), "Timeout reading from gps");
    }

    #[test]
    fn length_exceeded_message_names_both_lengths() {
        let err = DaqError::LengthExceeded {
            requested: 10,
            allocated: 8,
        };
        assert_eq!(
            err.to_string(),
            "Sample length 10 exceeds allocated length 8"
        );
    }
}
