//! One pool per element type, created on first use.
//!
//! The registry is an ordinary value constructed at startup and handed to every
//! scanner and consumer that needs samples. Clones share the same pools.

use crate::element::SampleElement;
use crate::pool::{PoolStats, SamplePool};
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Type-erased view of a pool for statistics and teardown.
trait PoolInfo: Send + Sync {
    fn stats(&self) -> PoolStats;
    fn drain_and_destroy(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
}

impl<T: SampleElement> PoolInfo for SamplePool<T> {
    fn stats(&self) -> PoolStats {
        SamplePool::stats(self)
    }

    fn drain_and_destroy(&self) -> usize {
        SamplePool::drain_and_destroy(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry of sample pools keyed by element type.
#[derive(Clone, Default)]
pub struct PoolRegistry {
    pools: Arc<Mutex<HashMap<TypeId, Box<dyn PoolInfo>>>>,
}

impl PoolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The pool for element type `T`, created if this is the first request.
    pub fn pool<T: SampleElement>(&self) -> SamplePool<T> {
        let mut pools = self.pools.lock();
        let entry = pools.entry(TypeId::of::<T>()).or_insert_with(|| {
            debug!(element_type = %T::TYPE, "Creating sample pool");
            Box::new(SamplePool::<T>::new())
        });
        match entry.as_any().downcast_ref::<SamplePool<T>>() {
            Some(pool) => pool.clone(),
            None => {
                // keyed by TypeId, so the entry always holds SamplePool<T>
                let pool = SamplePool::<T>::new();
                *entry = Box::new(pool.clone());
                pool
            }
        }
    }

    /// Statistics for every pool created so far.
    pub fn stats(&self) -> Vec<PoolStats> {
        let pools = self.pools.lock();
        let mut stats: Vec<PoolStats> = pools.values().map(|p| p.stats()).collect();
        stats.sort_by_key(|s| s.element_type.code());
        stats
    }

    /// Drain every pool and forget it. Returns the number of buffers freed.
    ///
    /// Pool handles obtained earlier stay valid and keep working independently.
    pub fn drain_all(&self) -> usize {
        let pools: Vec<Box<dyn PoolInfo>> = self.pools.lock().drain().map(|(_, p)| p).collect();
        pools.iter().map(|p| p.drain_and_destroy()).sum()
    }

    /// Number of pools created so far.
    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    /// Whether no pool has been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.stats())
            .finish()
    }
}
