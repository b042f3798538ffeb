//! `daq-core`
//!
//! Shared foundation of the sample acquisition pipeline.
//!
//! ## Key Types
//!
//! - [`DaqError`]: error taxonomy shared by every crate (I/O, timeout, capacity, configuration)
//! - [`SampleId`] / [`SampleType`]: the composite 32-bit sample identifier
//! - [`TimeTag`] / [`SampleClock`]: microsecond time tags and the clock used to check them
//! - [`config::AcquisitionConfig`]: Figment-backed node configuration
//!
//! ## Example
//!
//! ```rust
//! use daq_core::{SampleId, SampleType};
//!
//! let id = SampleId::new(3, 0x8010).with_type(SampleType::UChar);
//! assert_eq!(id.to_string(), "3,32784");
//! assert_eq!(id.full_id(), SampleId::new(3, 0x8010));
//! ```

pub mod config;
pub mod error;
pub mod escape;
pub mod limits;
pub mod sample_id;
pub mod time;

pub use error::{DaqError, Result};
pub use sample_id::{SampleId, SampleType};
pub use time::{ManualClock, SampleClock, SystemClock, TimeTag};
