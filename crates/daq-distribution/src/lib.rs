//! Sample distribution.
//!
//! A [`SampleSource`] delivers each published sample to every subscribed
//! [`SampleClient`] exactly once per registration and then releases the
//! publisher's reference, so the buffer returns to its pool as soon as the last
//! client that held it lets go.
//!
//! ```
//! use std::sync::Arc;
//! use daq_core::SampleId;
//! use daq_distribution::{SampleClient, SampleSource};
//! use daq_pool::{Sample, SamplePool};
//!
//! let source = SampleSource::<u8>::new();
//! let printer: Arc<dyn SampleClient<u8>> = Arc::new(|s: &Sample<u8>| {
//!     println!("{} {:?}", s.id(), s.data());
//!     true
//! });
//! source.subscribe_for(&printer, SampleId::new(1, 10));
//!
//! let pool = SamplePool::new();
//! let mut sample = pool.acquire(2)?;
//! sample.set_id(SampleId::new(1, 10));
//! source.publish(sample.freeze());
//! assert_eq!(pool.stats().checked_out, 0);
//! # Ok::<(), daq_core::DaqError>(())
//! ```

pub mod client;
pub mod source;

pub use client::SampleClient;
pub use source::{SampleSource, SourceStats};
