//! Time tag jitter correction.
//!
//! Sensors that sample on a fixed period are time-tagged on arrival, so their
//! tags carry the jitter of serial buffering and scheduling. [`TimetagAdjuster`]
//! rebuilds an evenly spaced, monotonic time base from those tags; [`AdjusterSet`]
//! keeps one per sample stream.
//!
//! ```
//! use daq_timing::TimetagAdjuster;
//!
//! let mut adj = TimetagAdjuster::with_default_gap(100.0, 10.0)?;
//! let raw = [1_000_000, 1_010_700, 1_020_100, 1_030_400];
//! let corrected: Vec<i64> = raw.iter().map(|&tt| adj.adjust(tt)).collect();
//! assert_eq!(corrected, vec![1_000_000, 1_010_000, 1_020_000, 1_030_000]);
//! # Ok::<(), daq_core::DaqError>(())
//! ```

pub mod adjuster;
pub mod set;

pub use adjuster::{AdjusterStats, TimetagAdjuster};
pub use set::AdjusterSet;
