//! Publish/subscribe fan-out of samples.
//!
//! A [`SampleSource`] keeps two subscriber structures: clients that want every
//! sample, and clients that want samples of particular ids. Publishing snapshots
//! both under the lock, releases it, and then calls each client, so a client may
//! change its own subscriptions from inside its callback.
//!
//! Subscriber lists are copy-on-write (`Arc<Vec<_>>`): a publish takes a snapshot
//! by cloning two `Arc`s, and only (un)subscribing copies a list.

use crate::client::{client_key, SampleClient};
use daq_core::{SampleId, TimeTag};
use daq_pool::{Sample, SampleElement};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// Subscription
// ============================================================================

/// One registration of a client. Cleared when unsubscribed so that deliveries from
/// snapshots taken earlier are skipped.
struct Subscription<T: SampleElement> {
    client: Arc<dyn SampleClient<T>>,
    key: usize,
    active: AtomicBool,
}

impl<T: SampleElement> Subscription<T> {
    fn new(client: Arc<dyn SampleClient<T>>) -> Arc<Self> {
        let key = client_key(&client);
        Arc::new(Self {
            client,
            key,
            active: AtomicBool::new(true),
        })
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn deliver(&self, sample: &Sample<T>) {
        if self.active.load(Ordering::Acquire) && !self.client.receive(sample) {
            debug!(
                client = self.client.name(),
                id = %sample.id(),
                "Client rejected sample"
            );
        }
    }
}

type SubscriberList<T> = Arc<Vec<Arc<Subscription<T>>>>;

struct Subscribers<T: SampleElement> {
    all: SubscriberList<T>,
    by_id: HashMap<SampleId, SubscriberList<T>>,
}

impl<T: SampleElement> Subscribers<T> {
    fn add(list: &mut SubscriberList<T>, client: &Arc<dyn SampleClient<T>>) {
        let key = client_key(client);
        if !list.iter().any(|s| s.key == key) {
            Arc::make_mut(list).push(Subscription::new(Arc::clone(client)));
        }
    }

    fn remove(list: &mut SubscriberList<T>, key: usize) {
        if let Some(pos) = list.iter().position(|s| s.key == key) {
            list[pos].deactivate();
            Arc::make_mut(list).remove(pos);
        }
    }
}

// ============================================================================
// SourceStats
// ============================================================================

/// Snapshot of a source's publish counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceStats {
    /// Samples published.
    pub samples: u64,
    /// Data bytes published.
    pub bytes: u64,
    /// Time tag of the last published sample.
    pub last_time_tag: TimeTag,
}

// ============================================================================
// SampleSource
// ============================================================================

/// Distributor of samples of element type `T` to subscribed clients.
pub struct SampleSource<T: SampleElement> {
    subscribers: Mutex<Subscribers<T>>,
    keep_stats: AtomicBool,
    samples: AtomicU64,
    bytes: AtomicU64,
    last_time_tag: AtomicI64,
}

impl<T: SampleElement> Default for SampleSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SampleElement> SampleSource<T> {
    /// Source with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Subscribers {
                all: Arc::new(Vec::new()),
                by_id: HashMap::new(),
            }),
            keep_stats: AtomicBool::new(false),
            samples: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            last_time_tag: AtomicI64::new(0),
        }
    }

    /// Deliver every sample to `client`. Subscribing twice has no further effect.
    pub fn subscribe_all(&self, client: &Arc<dyn SampleClient<T>>) {
        Subscribers::add(&mut self.subscribers.lock().all, client);
    }

    /// Stop delivering every sample to `client`. Id subscriptions are kept.
    pub fn unsubscribe_all(&self, client: &Arc<dyn SampleClient<T>>) {
        Subscribers::remove(&mut self.subscribers.lock().all, client_key(client));
    }

    /// Deliver samples with `id` to `client`.
    pub fn subscribe_for(&self, client: &Arc<dyn SampleClient<T>>, id: SampleId) {
        let mut subs = self.subscribers.lock();
        let list = subs
            .by_id
            .entry(id.full_id())
            .or_insert_with(|| Arc::new(Vec::new()));
        Subscribers::add(list, client);
    }

    /// Stop delivering samples with `id` to `client`.
    pub fn unsubscribe_for(&self, client: &Arc<dyn SampleClient<T>>, id: SampleId) {
        let id = id.full_id();
        let mut subs = self.subscribers.lock();
        if let Some(list) = subs.by_id.get_mut(&id) {
            Subscribers::remove(list, client_key(client));
            if list.is_empty() {
                subs.by_id.remove(&id);
            }
        }
    }

    /// Remove every registration of `client`.
    pub fn remove_client(&self, client: &Arc<dyn SampleClient<T>>) {
        let key = client_key(client);
        let mut subs = self.subscribers.lock();
        Subscribers::remove(&mut subs.all, key);
        subs.by_id.retain(|_, list| {
            Subscribers::remove(list, key);
            !list.is_empty()
        });
    }

    /// Number of distinct subscribed clients.
    pub fn client_count(&self) -> usize {
        let subs = self.subscribers.lock();
        subs.all
            .iter()
            .chain(subs.by_id.values().flat_map(|list| list.iter()))
            .map(|s| s.key)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Deliver `sample` to its id subscribers, then to the all subscribers, and
    /// release the publisher's reference.
    pub fn publish(&self, sample: Sample<T>) {
        let (by_id, all) = {
            let subs = self.subscribers.lock();
            (
                subs.by_id.get(&sample.id()).map(Arc::clone),
                Arc::clone(&subs.all),
            )
        };
        if self.keep_stats.load(Ordering::Relaxed) {
            self.samples.fetch_add(1, Ordering::Relaxed);
            self.bytes
                .fetch_add(sample.data_byte_length() as u64, Ordering::Relaxed);
            self.last_time_tag
                .store(sample.time_tag(), Ordering::Relaxed);
        }
        if let Some(list) = by_id {
            for sub in list.iter() {
                sub.deliver(&sample);
            }
        }
        for sub in all.iter() {
            sub.deliver(&sample);
        }
    }

    /// Publish each sample in order.
    pub fn publish_all(&self, samples: impl IntoIterator<Item = Sample<T>>) {
        for sample in samples {
            self.publish(sample);
        }
    }

    /// Call `flush` once on every distinct subscribed client.
    pub fn flush(&self) {
        let clients: Vec<Arc<dyn SampleClient<T>>> = {
            let subs = self.subscribers.lock();
            let mut seen = HashSet::new();
            subs.all
                .iter()
                .chain(subs.by_id.values().flat_map(|list| list.iter()))
                .filter(|s| seen.insert(s.key))
                .map(|s| Arc::clone(&s.client))
                .collect()
        };
        for client in clients {
            client.flush();
        }
    }

    /// Enable or disable publish counters.
    pub fn set_keep_stats(&self, keep: bool) {
        self.keep_stats.store(keep, Ordering::Relaxed);
    }

    /// Publish counters. All zero unless enabled with [`set_keep_stats`](Self::set_keep_stats).
    pub fn stats(&self) -> SourceStats {
        SourceStats {
            samples: self.samples.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            last_time_tag: self.last_time_tag.load(Ordering::Relaxed),
        }
    }
}

impl<T: SampleElement> std::fmt::Debug for SampleSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subs = self.subscribers.lock();
        f.debug_struct("SampleSource")
            .field("all", &subs.all.len())
            .field("by_id", &subs.by_id.len())
            .field("stats", &self.stats())
            .finish()
    }
}
