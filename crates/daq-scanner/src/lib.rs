//! Sample scanners: raw sensor bytes in, framed and time-tagged samples out.
//!
//! A [`SampleScanner`] owns a scan buffer and a framing state machine. The caller
//! alternates [`SampleScanner::fill`], which performs exactly one read from a
//! [`SensorSource`], with [`SampleScanner::next_sample`] until it returns `None`.
//! Messages may be split over any number of reads.
//!
//! Framing disciplines ([`Framing`]):
//!
//! - **Driver**: records carry a 6-byte header (time of day in ticks, length)
//! - **Length**: every message is exactly N bytes
//! - **Separator**: a separator ends (EOM) or begins (BOM) each message, optionally
//!   after a fixed-length prefix
//! - **Datagram**: one sample per packet, zero-length packets included
//!
//! Sample buffers come from a [`daq_pool::SamplePool`]; time tags are back-corrected
//! for serialization delay using the configured microseconds per byte.

pub mod buffer;
mod datagram;
pub mod driver;
pub mod scanner;
pub mod scripted;
pub mod separator;
pub mod source;
pub mod stats;
pub mod stream;

pub use buffer::ScanBuffer;
pub use driver::{DriverHeader, DRIVER_HEADER_LEN};
pub use scanner::{FillResult, Framing, SampleScanner, ScannerSettings};
pub use scripted::{ScriptEvent, ScriptedSource};
pub use separator::SeparatorMatcher;
#[cfg(feature = "serial")]
pub use source::SerialSource;
pub use source::{ReaderSource, SensorSource, UdpSource};
pub use stats::ScannerStats;
pub use stream::AllocSizer;
