//! Pooled, reference-counted samples.
//!
//! Acquisition threads build samples at high rates; allocating every buffer would
//! dominate the hot path. This crate keeps released sample buffers on size-segregated
//! free lists and hands them back out on the next request.
//!
//! - [`SamplePool<T>`]: one pool per element type with small/medium/large free lists
//! - [`SampleMut<T>`]: unique handle returned by [`SamplePool::acquire`]
//! - [`Sample<T>`]: shared handle; the last drop returns the buffer to the pool
//! - [`PoolRegistry`]: explicitly constructed map from element type to pool
//!
//! # Example
//!
//! ```
//! use daq_core::SampleId;
//! use daq_pool::PoolRegistry;
//!
//! let registry = PoolRegistry::new();
//! let pool = registry.pool::<u8>();
//!
//! let mut sample = pool.acquire(4)?;
//! sample.set_id(SampleId::new(1, 20));
//! sample.set_time_tag(1_000_000);
//! sample.data_mut().copy_from_slice(b"T=21");
//!
//! let sample = sample.freeze();
//! let consumer = sample.hold();
//! assert_eq!(sample.ref_count(), 2);
//! drop(sample);
//! assert_eq!(consumer.data(), b"T=21");
//! # Ok::<(), daq_core::DaqError>(())
//! ```

pub mod element;
pub mod pool;
pub mod registry;
pub mod sample;

pub use element::SampleElement;
pub use pool::{PoolStats, SamplePool, SizeClass};
pub use registry::PoolRegistry;
pub use sample::{Sample, SampleMut};
