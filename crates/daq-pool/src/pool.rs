//! Size-segregated sample pool for one element type.
//!
//! Free samples are kept in three lists by allocated length. Acquire and release
//! take the pool mutex only for the list and counter bookkeeping; buffer growth and
//! poisoning happen outside the lock.
//!
//! # Accounting
//!
//! Every observation point satisfies
//! `allocated == free_small + free_medium + free_large + checked_out`.

use crate::element::SampleElement;
use crate::sample::{SampleMut, SampleSlot};
use daq_core::limits::validate_sample_elements;
use daq_core::{DaqError, SampleType};
use parking_lot::Mutex;
use std::mem::size_of;
use std::sync::Arc;
use tracing::debug;

/// Samples with fewer elements than this are small.
pub const SMALL_SAMPLE_MAXSIZE: usize = 64;
/// Samples with fewer elements than this (and not small) are medium.
pub const MEDIUM_SAMPLE_MAXSIZE: usize = 512;
/// Free items a larger class must hold before it serves a smaller request.
pub const PROMOTE_THRESHOLD: usize = 4;

/// Pool size class of a sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Fewer than [`SMALL_SAMPLE_MAXSIZE`] elements.
    Small = 0,
    /// Fewer than [`MEDIUM_SAMPLE_MAXSIZE`] elements.
    Medium = 1,
    /// Everything else.
    Large = 2,
}

impl SizeClass {
    /// Class of a buffer with `len` elements.
    pub fn for_length(len: usize) -> Self {
        if len < SMALL_SAMPLE_MAXSIZE {
            SizeClass::Small
        } else if len < MEDIUM_SAMPLE_MAXSIZE {
            SizeClass::Medium
        } else {
            SizeClass::Large
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Element type served by the pool.
    pub element_type: SampleType,
    /// Samples ever allocated and not yet destroyed.
    pub allocated: usize,
    /// Samples currently held outside the pool.
    pub checked_out: usize,
    /// Free small samples.
    pub small_free: usize,
    /// Free medium samples.
    pub medium_free: usize,
    /// Free large samples.
    pub large_free: usize,
}

impl PoolStats {
    /// Total free samples across classes.
    pub fn free(&self) -> usize {
        self.small_free + self.medium_free + self.large_free
    }

    /// Whether the accounting identity holds.
    pub fn is_consistent(&self) -> bool {
        self.allocated == self.free() + self.checked_out
    }
}

struct PoolState<T: SampleElement> {
    free: [Vec<Box<SampleSlot<T>>>; 3],
    allocated: usize,
    checked_out: usize,
    drained: bool,
}

impl<T: SampleElement> PoolState<T> {
    fn new() -> Self {
        let slot_bytes = size_of::<SampleSlot<T>>();
        let small = (16_384 / (slot_bytes + SMALL_SAMPLE_MAXSIZE * size_of::<T>())).max(2);
        let medium = (small / 8).max(2);
        let large = (medium / 2).max(2);
        Self {
            free: [
                Vec::with_capacity(small),
                Vec::with_capacity(medium),
                Vec::with_capacity(large),
            ],
            allocated: 0,
            checked_out: 0,
            drained: false,
        }
    }

    fn free_len(&self, class: SizeClass) -> usize {
        self.free[class as usize].len()
    }

    /// Class that should serve a request for `len` elements.
    fn choose(&self, len: usize) -> SizeClass {
        match SizeClass::for_length(len) {
            SizeClass::Small => {
                if self.free_len(SizeClass::Small) > 0 {
                    SizeClass::Small
                } else if self.free_len(SizeClass::Medium) >= PROMOTE_THRESHOLD {
                    SizeClass::Medium
                } else if self.free_len(SizeClass::Large) >= PROMOTE_THRESHOLD {
                    SizeClass::Large
                } else {
                    SizeClass::Small
                }
            }
            SizeClass::Medium => {
                if self.free_len(SizeClass::Medium) == 0
                    && self.free_len(SizeClass::Large) >= PROMOTE_THRESHOLD
                {
                    SizeClass::Large
                } else {
                    SizeClass::Medium
                }
            }
            SizeClass::Large => SizeClass::Large,
        }
    }

    fn push_free(&mut self, slot: Box<SampleSlot<T>>) {
        let list = &mut self.free[SizeClass::for_length(slot.allocated_len()) as usize];
        if list.len() == list.capacity() {
            let extra = (list.capacity() / 2).max(1);
            list.reserve_exact(extra);
        }
        list.push(slot);
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            element_type: T::TYPE,
            allocated: self.allocated,
            checked_out: self.checked_out,
            small_free: self.free_len(SizeClass::Small),
            medium_free: self.free_len(SizeClass::Medium),
            large_free: self.free_len(SizeClass::Large),
        }
    }

    fn check(&self) {
        debug_assert!(
            self.stats().is_consistent(),
            "pool accounting broken: {:?}",
            self.stats()
        );
    }
}

/// State shared between a pool handle and the samples it hands out.
pub(crate) struct PoolShared<T: SampleElement> {
    state: Mutex<PoolState<T>>,
}

impl<T: SampleElement> PoolShared<T> {
    /// Return a slot whose last reference was dropped.
    pub(crate) fn reclaim(&self, slot: Box<SampleSlot<T>>) {
        let mut state = self.state.lock();
        state.checked_out -= 1;
        if state.drained {
            state.allocated -= 1;
            state.check();
            drop(state);
            drop(slot);
            return;
        }
        state.push_free(slot);
        state.check();
    }

    pub(crate) fn stats(&self) -> PoolStats {
        self.state.lock().stats()
    }

    pub(crate) fn drain(&self) -> usize {
        let drained: Vec<Vec<Box<SampleSlot<T>>>> = {
            let mut state = self.state.lock();
            let lists = state.free.iter_mut().map(std::mem::take).collect::<Vec<_>>();
            let freed: usize = lists.iter().map(Vec::len).sum();
            state.allocated -= freed;
            state.drained = true;
            state.check();
            lists
        };
        let freed = drained.iter().map(Vec::len).sum();
        debug!(element_type = %T::TYPE, freed, "Drained sample pool");
        freed
    }
}

/// Pool of samples whose buffers hold elements of type `T`.
///
/// Cloning the pool is cheap and every clone refers to the same free lists.
///
/// # Example
///
/// ```
/// use daq_pool::SamplePool;
///
/// let pool = SamplePool::<u8>::new();
/// let mut sample = pool.acquire(5)?;
/// sample.data_mut().copy_from_slice(b"hello");
/// let shared = sample.freeze();
/// assert_eq!(pool.stats().checked_out, 1);
/// drop(shared);
/// assert_eq!(pool.stats().checked_out, 0);
/// assert_eq!(pool.stats().small_free, 1);
/// # Ok::<(), daq_core::DaqError>(())
/// ```
pub struct SamplePool<T: SampleElement> {
    shared: Arc<PoolShared<T>>,
}

impl<T: SampleElement> Clone for SamplePool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: SampleElement> Default for SamplePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SampleElement> SamplePool<T> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState::new()),
            }),
        }
    }

    /// Get a sample with at least `min_len` elements and data length `min_len`.
    ///
    /// Reuses a free sample when one is available, growing its buffer if it is too
    /// small, and allocates otherwise. Fails when `min_len` exceeds the largest
    /// representable sample.
    pub fn acquire(&self, min_len: usize) -> Result<SampleMut<T>, DaqError> {
        validate_sample_elements(min_len, size_of::<T>())?;
        let reused = {
            let mut state = self.shared.state.lock();
            let class = state.choose(min_len);
            let slot = state.free[class as usize].pop();
            if slot.is_none() {
                state.allocated += 1;
            }
            state.checked_out += 1;
            state.check();
            slot
        };
        let slot = match reused {
            Some(mut slot) => {
                slot.recycle(min_len);
                slot
            }
            None => SampleSlot::new(min_len, Arc::downgrade(&self.shared)),
        };
        Ok(SampleMut::from_slot(slot))
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Free every buffer on the free lists and return how many were freed.
    ///
    /// The pool stops recycling: samples still checked out, and any acquired
    /// afterwards, are freed when their last handle drops.
    pub fn drain_and_destroy(&self) -> usize {
        self.shared.drain()
    }
}
