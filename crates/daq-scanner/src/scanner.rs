//! The sample scanner: one physical read at a time in, framed samples out.
//!
//! Usage is a two-step loop owned by a single acquisition thread:
//!
//! ```
//! use std::sync::Arc;
//! use daq_core::{SampleId, SystemClock};
//! use daq_pool::SamplePool;
//! use daq_scanner::{Framing, SampleScanner, ScannerSettings, ScriptedSource};
//!
//! let mut source = ScriptedSource::stream("gps", SampleId::new(1, 10));
//! source.push_data(b"$GPGGA,1\n$GPG".to_vec()).push_data(b"GA,2\n".to_vec());
//!
//! let settings = ScannerSettings::new(Framing::separator(b"\n".to_vec(), true));
//! let mut scanner = SampleScanner::new(settings, SamplePool::new(), Arc::new(SystemClock::default()))?;
//! let mut lines = Vec::new();
//! while !scanner.fill(&mut source, None)?.exhausted {
//!     while let Some(sample) = scanner.next_sample(&source)? {
//!         lines.push(sample.data().to_vec());
//!     }
//! }
//! assert_eq!(lines, vec![b"$GPGGA,1\n\0".to_vec(), b"$GPGGA,2\n\0".to_vec()]);
//! # Ok::<(), daq_core::DaqError>(())
//! ```

use crate::buffer::ScanBuffer;
use crate::datagram::DatagramFramer;
use crate::driver::DriverFramer;
use crate::source::SensorSource;
use crate::stats::ScannerStats;
use crate::stream::StreamFramer;
use daq_core::config::{ByteOrder, FramingKind, ScannerConfig};
use daq_core::limits::{
    DATAGRAM_SCAN_BUFFER_SIZE, DEFAULT_MAX_SAMPLE_LENGTH, DRIVER_SCAN_BUFFER_SIZE,
    MAX_SAMPLE_DATA_BYTES, STREAM_SCAN_BUFFER_SIZE,
};
use daq_core::{DaqError, SampleClock, SampleId, TimeTag};
use daq_pool::{SampleMut, SamplePool};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Framing discipline and its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Records prefixed by a driver header: `u32` ticks, `u16` length.
    Driver {
        /// Length of one header tick in microseconds.
        usecs_per_tick: i64,
        /// Byte order of the header fields.
        byte_order: ByteOrder,
    },
    /// Exactly `message_length` bytes per sample.
    Length {
        /// Bytes per sample.
        message_length: usize,
    },
    /// Messages delimited by a separator, optionally after a fixed-length prefix.
    Separator {
        /// Separator bytes, not empty.
        separator: Vec<u8>,
        /// Separator ends a message (true) or begins one (false).
        at_eom: bool,
        /// Bytes read verbatim before scanning for the separator.
        message_length: usize,
    },
    /// One sample per datagram.
    Datagram,
}

impl Framing {
    /// Separator framing without a fixed-length prefix.
    pub fn separator(separator: Vec<u8>, at_eom: bool) -> Self {
        Framing::Separator {
            separator,
            at_eom,
            message_length: 0,
        }
    }

    /// Driver framing with little-endian headers.
    pub fn driver(usecs_per_tick: i64) -> Self {
        Framing::Driver {
            usecs_per_tick,
            byte_order: ByteOrder::Little,
        }
    }
}

/// Everything needed to build a scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerSettings {
    /// Framing discipline.
    pub framing: Framing,
    /// Scan buffer size in bytes.
    pub buffer_size: usize,
    /// Largest sample a stream scanner assembles.
    pub max_sample_length: usize,
    /// Append a null byte to each stream or datagram sample.
    pub null_terminate: bool,
    /// Serialization delay per byte for back-correcting time tags.
    pub usecs_per_byte: i64,
}

impl ScannerSettings {
    /// Defaults for `framing`: framing-specific buffer size, null termination when a
    /// separator ends in CR or LF.
    pub fn new(framing: Framing) -> Self {
        let buffer_size = match framing {
            Framing::Driver { .. } => DRIVER_SCAN_BUFFER_SIZE,
            Framing::Length { .. } | Framing::Separator { .. } => STREAM_SCAN_BUFFER_SIZE,
            Framing::Datagram => DATAGRAM_SCAN_BUFFER_SIZE,
        };
        let null_terminate = matches!(
            &framing,
            Framing::Separator { separator, .. } if matches!(separator.last(), Some(b'\r' | b'\n'))
        );
        Self {
            framing,
            buffer_size,
            max_sample_length: DEFAULT_MAX_SAMPLE_LENGTH,
            null_terminate,
            usecs_per_byte: 0,
        }
    }

    /// Settings from a sensor's scanner configuration.
    pub fn from_config(config: &ScannerConfig) -> Result<Self, DaqError> {
        config.validate()?;
        let framing = match config.framing {
            FramingKind::Driver => Framing::Driver {
                usecs_per_tick: config.usecs_per_tick,
                byte_order: config.byte_order,
            },
            FramingKind::Datagram => Framing::Datagram,
            FramingKind::Stream => {
                let separator = config.separator_bytes()?;
                if separator.is_empty() {
                    Framing::Length {
                        message_length: config.message_length,
                    }
                } else {
                    Framing::Separator {
                        separator,
                        at_eom: config.separator_at_eom,
                        message_length: config.message_length,
                    }
                }
            }
        };
        Ok(Self {
            framing,
            buffer_size: config.effective_buffer_size(),
            max_sample_length: config.max_sample_length,
            null_terminate: config.null_terminate_enabled()?,
            usecs_per_byte: config.usecs_per_byte,
        })
    }

    /// Reject settings that could never terminate a message or never fit one.
    pub fn validate(&self) -> Result<(), DaqError> {
        if self.buffer_size == 0 {
            return Err(DaqError::Configuration("buffer_size must be positive".into()));
        }
        if self.usecs_per_byte < 0 {
            return Err(DaqError::Configuration(
                "usecs_per_byte must not be negative".into(),
            ));
        }
        if self.max_sample_length == 0 || self.max_sample_length > MAX_SAMPLE_DATA_BYTES {
            return Err(DaqError::Configuration(format!(
                "max_sample_length {} out of range",
                self.max_sample_length
            )));
        }
        let nterm = usize::from(self.null_terminate);
        let needed = match &self.framing {
            Framing::Driver { usecs_per_tick, .. } => {
                if *usecs_per_tick <= 0 {
                    return Err(DaqError::Configuration(
                        "usecs_per_tick must be positive".into(),
                    ));
                }
                0
            }
            Framing::Datagram => 0,
            Framing::Length { message_length } => {
                if *message_length == 0 {
                    return Err(DaqError::Configuration(
                        "message length of zero with no separator".into(),
                    ));
                }
                message_length + nterm
            }
            Framing::Separator {
                separator,
                message_length,
                ..
            } => {
                if separator.is_empty() {
                    return Err(DaqError::Configuration("empty message separator".into()));
                }
                message_length + separator.len() + nterm
            }
        };
        if needed > self.max_sample_length {
            return Err(DaqError::Configuration(format!(
                "message of {} bytes exceeds max_sample_length {}",
                needed, self.max_sample_length
            )));
        }
        Ok(())
    }
}

/// Outcome of one [`SampleScanner::fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillResult {
    /// Bytes added to the scan buffer.
    pub bytes_read: usize,
    /// The source reported end of data.
    pub exhausted: bool,
}

/// Receipt timing of the latest read.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ReadTiming {
    /// Estimated arrival of the first byte of the read.
    pub t_first: TimeTag,
    /// Buffer offset of that byte.
    pub read_start: usize,
    pub usecs_per_byte: i64,
}

impl ReadTiming {
    /// Estimated arrival of the byte at buffer offset `index`.
    pub fn byte_time(&self, index: usize) -> TimeTag {
        self.t_first + (index as i64 - self.read_start as i64) * self.usecs_per_byte
    }
}

/// Borrowed scanner state handed to a framer.
pub(crate) struct ScanContext<'a> {
    pub buffer: &'a mut ScanBuffer,
    pub stats: &'a mut ScannerStats,
    pub pool: &'a SamplePool<u8>,
    pub clock: &'a dyn SampleClock,
    pub timing: ReadTiming,
    pub id: SampleId,
    pub name: &'a str,
}

/// Read from `source`, mapping timeouts and end of data.
///
/// Returns `None` when the source reports [`io::ErrorKind::UnexpectedEof`].
pub(crate) fn read_source<S: SensorSource + ?Sized>(
    source: &mut S,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<Option<usize>, DaqError> {
    match source.read(buf, timeout) {
        Ok(n) => Ok(Some(n)),
        Err(e) => match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Err(DaqError::Timeout {
                device: source.name().to_string(),
            }),
            io::ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(DaqError::Io(e)),
        },
    }
}

enum Framer {
    Driver(DriverFramer),
    Stream(StreamFramer),
    Datagram(DatagramFramer),
}

/// Stateful parser from sensor bytes to framed samples.
///
/// Not synchronized: a scanner belongs to the thread that calls
/// [`fill`](SampleScanner::fill) and [`next_sample`](SampleScanner::next_sample).
pub struct SampleScanner {
    framer: Framer,
    buffer: ScanBuffer,
    stats: ScannerStats,
    pool: SamplePool<u8>,
    clock: Arc<dyn SampleClock>,
    timing: ReadTiming,
    name: String,
    settings: ScannerSettings,
}

impl SampleScanner {
    /// Build a scanner drawing sample buffers from `pool` and time from `clock`.
    pub fn new(
        settings: ScannerSettings,
        pool: SamplePool<u8>,
        clock: Arc<dyn SampleClock>,
    ) -> Result<Self, DaqError> {
        settings.validate()?;
        let framer = match &settings.framing {
            Framing::Driver {
                usecs_per_tick,
                byte_order,
            } => Framer::Driver(DriverFramer::new(*usecs_per_tick, *byte_order)),
            Framing::Datagram => Framer::Datagram(DatagramFramer::new(settings.null_terminate)),
            Framing::Length { message_length } => Framer::Stream(StreamFramer::by_length(
                *message_length,
                settings.null_terminate,
                settings.max_sample_length,
            )),
            Framing::Separator {
                separator,
                at_eom,
                message_length,
            } => Framer::Stream(StreamFramer::by_separator(
                separator.clone(),
                *at_eom,
                *message_length,
                settings.null_terminate,
                settings.max_sample_length,
            )),
        };
        Ok(Self {
            framer,
            buffer: ScanBuffer::new(settings.buffer_size),
            stats: ScannerStats::default(),
            pool,
            clock,
            timing: ReadTiming {
                usecs_per_byte: settings.usecs_per_byte,
                ..ReadTiming::default()
            },
            name: String::new(),
            settings,
        })
    }

    /// Settings the scanner was built with.
    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    /// Counters.
    pub fn stats(&self) -> &ScannerStats {
        &self.stats
    }

    /// Close a statistics period of `period` microseconds.
    pub fn calc_statistics(&mut self, period: TimeTag) {
        self.stats.calc_statistics(period);
    }

    /// Unread bytes in the scan buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.available()
    }

    /// Perform one read from `source` into the scan buffer.
    ///
    /// Blocks for at most `timeout` when given; expiry is [`DaqError::Timeout`]. Read
    /// failures are returned as [`DaqError::Io`] and are not retried.
    pub fn fill<S: SensorSource + ?Sized>(
        &mut self,
        source: &mut S,
        timeout: Option<Duration>,
    ) -> Result<FillResult, DaqError> {
        if self.name.is_empty() {
            self.name = source.name().to_string();
        }
        if let Framer::Datagram(framer) = &mut self.framer {
            return framer.fill(
                source,
                &mut self.buffer,
                &mut self.stats,
                self.clock.as_ref(),
                timeout,
            );
        }

        self.buffer.compact();
        if self.buffer.spare_mut().is_empty() {
            return Ok(FillResult {
                bytes_read: 0,
                exhausted: false,
            });
        }
        let start = self.buffer.head();
        let n = match read_source(source, self.buffer.spare_mut(), timeout)? {
            Some(n) if n > 0 => n,
            _ => {
                return Ok(FillResult {
                    bytes_read: 0,
                    exhausted: true,
                })
            }
        };
        let now = self.clock.now();
        self.timing = ReadTiming {
            t_first: now - n as i64 * self.settings.usecs_per_byte,
            read_start: start,
            usecs_per_byte: self.settings.usecs_per_byte,
        };
        self.buffer.advance_head(n);
        self.stats.add_bytes(n);
        Ok(FillResult {
            bytes_read: n,
            exhausted: false,
        })
    }

    /// Extract the next complete sample, if any. Call until it returns `None`
    /// before the next [`fill`](SampleScanner::fill).
    pub fn next_sample<S: SensorSource + ?Sized>(
        &mut self,
        source: &S,
    ) -> Result<Option<SampleMut<u8>>, DaqError> {
        let mut ctx = ScanContext {
            buffer: &mut self.buffer,
            stats: &mut self.stats,
            pool: &self.pool,
            clock: self.clock.as_ref(),
            timing: self.timing,
            id: source.sample_id(),
            name: source.name(),
        };
        match &mut self.framer {
            Framer::Driver(f) => f.next(&mut ctx),
            Framer::Stream(f) => f.next(&mut ctx),
            Framer::Datagram(f) => f.next(&mut ctx),
        }
    }

    /// Emit the partially assembled stream sample, for use at end of data.
    pub fn flush_partial<S: SensorSource + ?Sized>(
        &mut self,
        source: &S,
    ) -> Result<Option<SampleMut<u8>>, DaqError> {
        let mut ctx = ScanContext {
            buffer: &mut self.buffer,
            stats: &mut self.stats,
            pool: &self.pool,
            clock: self.clock.as_ref(),
            timing: self.timing,
            id: source.sample_id(),
            name: source.name(),
        };
        match &mut self.framer {
            Framer::Stream(f) => f.flush_partial(&mut ctx),
            Framer::Driver(_) | Framer::Datagram(_) => Ok(None),
        }
    }
}

impl std::fmt::Debug for SampleScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleScanner")
            .field("name", &self.name)
            .field("framing", &self.settings.framing)
            .field("buffered", &self.buffer.available())
            .field("samples", &self.stats.samples())
            .finish()
    }
}
