//! Acquisition daemon library.
//!
//! Wires the pipeline crates together for the `daq-acquire` binary:
//!
//! - [`sources`]: open serial, UDP and file sources from configuration
//! - [`pipeline`]: one read → frame → correct → publish loop per sensor
//! - [`clients`]: built-in consumers of distributed samples
//! - [`logging`]: `tracing-subscriber` setup

pub mod clients;
pub mod logging;
pub mod pipeline;
pub mod sources;

pub use pipeline::{PipelineSummary, PollOutcome, SensorPipeline};
