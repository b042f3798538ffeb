//! Reference-counted sample handles.
//!
//! A sample lives in a heap slot owned by its pool. The slot carries an atomic
//! reference count; handles are thin pointers to the slot, so cloning a handle never
//! allocates. When the last handle is dropped the slot goes back to the pool's free
//! list instead of being freed.
//!
//! Two handle types split the lifecycle:
//!
//! - [`SampleMut`]: the unique handle returned by `acquire`. Only the creator can
//!   change the time tag, id, length and data.
//! - [`Sample`]: the shared, read-only handle obtained with [`SampleMut::freeze`].
//!   [`Sample::hold`] adds a reference, dropping (or [`Sample::release`]) removes one.

#![allow(unsafe_code)]

use crate::element::SampleElement;
use crate::pool::PoolShared;
use daq_core::limits::validate_sample_elements;
use daq_core::{DaqError, SampleId, SampleType, TimeTag};
use std::fmt;
use std::marker::PhantomData;
use std::mem::{size_of, ManuallyDrop};
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Weak;

/// Pool-owned storage behind a sample handle.
pub(crate) struct SampleSlot<T: SampleElement> {
    refs: AtomicUsize,
    time_tag: TimeTag,
    id: SampleId,
    length: usize,
    /// Allocated buffer, `data.len()` is the allocated length.
    data: Vec<T>,
    pool: Weak<PoolShared<T>>,
}

impl<T: SampleElement> SampleSlot<T> {
    pub(crate) fn new(len: usize, pool: Weak<PoolShared<T>>) -> Box<Self> {
        Box::new(Self {
            refs: AtomicUsize::new(1),
            time_tag: 0,
            id: SampleId::default().with_type(T::TYPE),
            length: len,
            data: vec![T::default(); len],
            pool,
        })
    }

    pub(crate) fn allocated_len(&self) -> usize {
        self.data.len()
    }

    /// Prepare a recycled slot for a new owner.
    pub(crate) fn recycle(&mut self, len: usize) {
        if self.data.len() < len {
            self.data.clear();
            self.data.resize(len, T::default());
        }
        if cfg!(debug_assertions) {
            self.data[len..].fill(T::POISON);
        }
        *self.refs.get_mut() = 1;
        self.time_tag = 0;
        self.id = SampleId::default().with_type(T::TYPE);
        self.length = len;
    }
}

/// Give the slot back to its pool, or free it if the pool is gone.
///
/// # Safety
///
/// `ptr` must come from `Box::into_raw` and no other handle may reference it.
unsafe fn release_slot<T: SampleElement>(ptr: NonNull<SampleSlot<T>>) {
    let slot = Box::from_raw(ptr.as_ptr());
    match slot.pool.upgrade() {
        Some(pool) => pool.reclaim(slot),
        None => drop(slot),
    }
}

/// Unique, mutable handle to a freshly acquired sample.
pub struct SampleMut<T: SampleElement> {
    slot: NonNull<SampleSlot<T>>,
    _marker: PhantomData<SampleSlot<T>>,
}

// SAFETY: SampleMut is the only handle to its slot, so moving it between threads
// moves exclusive ownership of the slot. T is Send.
unsafe impl<T: SampleElement> Send for SampleMut<T> {}
// SAFETY: &SampleMut only exposes shared reads of the slot.
unsafe impl<T: SampleElement> Sync for SampleMut<T> {}

impl<T: SampleElement> SampleMut<T> {
    pub(crate) fn from_slot(slot: Box<SampleSlot<T>>) -> Self {
        Self {
            slot: NonNull::from(Box::leak(slot)),
            _marker: PhantomData,
        }
    }

    fn slot(&self) -> &SampleSlot<T> {
        // SAFETY: the slot stays allocated while this handle exists.
        unsafe { self.slot.as_ref() }
    }

    fn slot_mut(&mut self) -> &mut SampleSlot<T> {
        // SAFETY: SampleMut is the unique handle, so no other reference exists.
        unsafe { self.slot.as_mut() }
    }

    /// Time tag in microseconds.
    pub fn time_tag(&self) -> TimeTag {
        self.slot().time_tag
    }

    /// Set the time tag.
    pub fn set_time_tag(&mut self, tt: TimeTag) {
        self.slot_mut().time_tag = tt;
    }

    /// Stream id without type bits.
    pub fn id(&self) -> SampleId {
        self.slot().id.full_id()
    }

    /// Set the stream id; the type bits always describe `T`.
    pub fn set_id(&mut self, id: SampleId) {
        self.slot_mut().id = id.full_id().with_type(T::TYPE);
    }

    /// Number of data elements.
    pub fn len(&self) -> usize {
        self.slot().length
    }

    /// Whether the sample holds no data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated capacity in elements.
    pub fn allocated_len(&self) -> usize {
        self.slot().allocated_len()
    }

    /// Set the data length, which must not exceed the allocated length.
    pub fn set_length(&mut self, len: usize) -> Result<(), DaqError> {
        let allocated = self.allocated_len();
        if len > allocated {
            return Err(DaqError::LengthExceeded {
                requested: len,
                allocated,
            });
        }
        self.slot_mut().length = len;
        Ok(())
    }

    /// Grow the allocation to at least `len` elements, keeping current contents.
    pub fn grow(&mut self, len: usize) -> Result<(), DaqError> {
        validate_sample_elements(len, size_of::<T>())?;
        let slot = self.slot_mut();
        if len > slot.data.len() {
            slot.data.resize(len, T::default());
        }
        Ok(())
    }

    /// The data elements.
    pub fn data(&self) -> &[T] {
        let slot = self.slot();
        &slot.data[..slot.length]
    }

    /// The data elements, mutable.
    pub fn data_mut(&mut self) -> &mut [T] {
        let slot = self.slot_mut();
        &mut slot.data[..slot.length]
    }

    /// The whole allocation, including elements past the data length.
    pub fn buffer_mut(&mut self) -> &mut [T] {
        &mut self.slot_mut().data[..]
    }

    /// Replace the data with `src`, growing the allocation if needed.
    pub fn copy_from_slice(&mut self, src: &[T]) -> Result<(), DaqError> {
        self.grow(src.len())?;
        self.buffer_mut()[..src.len()].copy_from_slice(src);
        self.set_length(src.len())
    }

    /// Convert into a shared handle. The reference count stays at one.
    pub fn freeze(self) -> Sample<T> {
        let this = ManuallyDrop::new(self);
        Sample {
            slot: this.slot,
            _marker: PhantomData,
        }
    }
}

impl<T: SampleElement> Drop for SampleMut<T> {
    fn drop(&mut self) {
        // SAFETY: unique handle, nobody else can observe the slot.
        unsafe { release_slot(self.slot) }
    }
}

impl<T: SampleElement> fmt::Debug for SampleMut<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleMut")
            .field("id", &self.id())
            .field("time_tag", &self.time_tag())
            .field("len", &self.len())
            .field("allocated", &self.allocated_len())
            .finish()
    }
}

/// Shared, reference-counted handle to a published sample.
pub struct Sample<T: SampleElement> {
    slot: NonNull<SampleSlot<T>>,
    _marker: PhantomData<SampleSlot<T>>,
}

// SAFETY: the slot is only read through Sample, and the reference count is atomic.
// The last handle to drop has exclusive access when it returns the slot.
unsafe impl<T: SampleElement> Send for Sample<T> {}
// SAFETY: see above; shared access is read-only.
unsafe impl<T: SampleElement> Sync for Sample<T> {}

impl<T: SampleElement> Sample<T> {
    fn slot(&self) -> &SampleSlot<T> {
        // SAFETY: the slot stays allocated while any handle holds a reference.
        unsafe { self.slot.as_ref() }
    }

    /// Add a reference. Equivalent to `clone()`.
    pub fn hold(&self) -> Self {
        self.clone()
    }

    /// Drop this reference. The last release returns the buffer to its pool.
    pub fn release(self) {
        drop(self);
    }

    /// Current number of references.
    pub fn ref_count(&self) -> usize {
        self.slot().refs.load(Ordering::Acquire)
    }

    /// Time tag in microseconds.
    pub fn time_tag(&self) -> TimeTag {
        self.slot().time_tag
    }

    /// Stream id without type bits.
    pub fn id(&self) -> SampleId {
        self.slot().id.full_id()
    }

    /// Id including the element type bits.
    pub fn raw_id(&self) -> SampleId {
        self.slot().id
    }

    /// Element type of the data buffer.
    pub fn sample_type(&self) -> SampleType {
        T::TYPE
    }

    /// Number of data elements.
    pub fn len(&self) -> usize {
        self.slot().length
    }

    /// Whether the sample holds no data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Data length in bytes.
    pub fn data_byte_length(&self) -> usize {
        self.len() * size_of::<T>()
    }

    /// Allocated capacity in elements.
    pub fn allocated_len(&self) -> usize {
        self.slot().allocated_len()
    }

    /// The data elements.
    pub fn data(&self) -> &[T] {
        let slot = self.slot();
        &slot.data[..slot.length]
    }

    /// Whether two handles refer to the same sample.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.slot == b.slot
    }
}

impl<T: SampleElement> Clone for Sample<T> {
    fn clone(&self) -> Self {
        self.slot().refs.fetch_add(1, Ordering::Relaxed);
        Self {
            slot: self.slot,
            _marker: PhantomData,
        }
    }
}

impl<T: SampleElement> Drop for Sample<T> {
    fn drop(&mut self) {
        if self.slot().refs.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        // SAFETY: this was the last reference.
        unsafe { release_slot(self.slot) }
    }
}

impl<T: SampleElement> fmt::Debug for Sample<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sample")
            .field("id", &self.id())
            .field("type", &T::TYPE)
            .field("time_tag", &self.time_tag())
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::SamplePool;
    use daq_core::{DaqError, SampleId, SampleType};

    #[test]
    fn header_fields_round_trip() {
        let pool = SamplePool::<f32>::new();
        let mut s = pool.acquire(3).unwrap();
        s.set_time_tag(1_700_000_000_000_000);
        s.set_id(SampleId::new(2, 31));
        s.data_mut().copy_from_slice(&[1.0, 2.5, -3.0]);
        let s = s.freeze();
        assert_eq!(s.time_tag(), 1_700_000_000_000_000);
        assert_eq!(s.id(), SampleId::new(2, 31));
        assert_eq!(s.raw_id().sample_type(), SampleType::Float);
        assert_eq!(s.data(), &[1.0, 2.5, -3.0]);
        assert_eq!(s.data_byte_length(), 12);
    }

    #[test]
    fn set_length_beyond_allocation_fails() {
        let pool = SamplePool::<u8>::new();
        let mut s = pool.acquire(4).unwrap();
        assert!(s.set_length(4).is_ok());
        assert!(matches!(
            s.set_length(5),
            Err(DaqError::LengthExceeded {
                requested: 5,
                allocated: 4
            })
        ));
        s.grow(5).unwrap();
        assert!(s.set_length(5).is_ok());
    }

    #[test]
    fn grow_keeps_contents() {
        let pool = SamplePool::<u8>::new();
        let mut s = pool.acquire(3).unwrap();
        s.data_mut().copy_from_slice(b"abc");
        s.grow(100).unwrap();
        assert!(s.allocated_len() >= 100);
        assert_eq!(s.data(), b"abc");
    }

    #[test]
    fn hold_and_release_track_references() {
        let pool = SamplePool::<i16>::new();
        let s = pool.acquire(8).unwrap().freeze();
        assert_eq!(s.ref_count(), 1);
        let held = s.hold();
        let again = held.clone();
        assert_eq!(s.ref_count(), 3);
        assert!(crate::Sample::ptr_eq(&s, &again));
        held.release();
        drop(again);
        assert_eq!(s.ref_count(), 1);
        assert_eq!(pool.stats().checked_out, 1);
        s.release();
        assert_eq!(pool.stats().checked_out, 0);
    }

    #[test]
    fn outlives_its_pool() {
        let s = {
            let pool = SamplePool::<u8>::new();
            let mut s = pool.acquire(2).unwrap();
            s.data_mut().copy_from_slice(b"ok");
            s.freeze()
        };
        assert_eq!(s.data(), b"ok");
        drop(s);
    }
}
