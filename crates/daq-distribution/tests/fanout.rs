//! Delivery guarantees of the sample fan-out.

use daq_core::SampleId;
use daq_distribution::{SampleClient, SampleSource};
use daq_pool::{Sample, SamplePool};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;

const GPS: SampleId = SampleId::new(1, 10);
const TEMP: SampleId = SampleId::new(1, 20);

#[derive(Default)]
struct Recorder {
    received: AtomicUsize,
    flushed: AtomicUsize,
    kept: Mutex<Vec<Sample<u8>>>,
    keep: bool,
}

impl Recorder {
    fn keeping() -> Self {
        Self {
            keep: true,
            ..Self::default()
        }
    }

    fn count(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

impl SampleClient<u8> for Recorder {
    fn receive(&self, sample: &Sample<u8>) -> bool {
        self.received.fetch_add(1, Ordering::SeqCst);
        if self.keep {
            self.kept.lock().push(sample.hold());
        }
        true
    }

    fn flush(&self) {
        self.flushed.fetch_add(1, Ordering::SeqCst);
    }
}

fn as_client(recorder: &Arc<Recorder>) -> Arc<dyn SampleClient<u8>> {
    recorder.clone()
}

fn sample(pool: &SamplePool<u8>, id: SampleId, data: &[u8]) -> Sample<u8> {
    let mut s = pool.acquire(data.len()).unwrap();
    s.set_id(id);
    s.data_mut().copy_from_slice(data);
    s.freeze()
}

#[test]
fn each_registration_receives_exactly_once() {
    let source = SampleSource::new();
    let pool = SamplePool::new();
    let all = Arc::new(Recorder::default());
    let gps_only = Arc::new(Recorder::default());
    let both = Arc::new(Recorder::default());

    source.subscribe_all(&as_client(&all));
    source.subscribe_for(&as_client(&gps_only), GPS);
    source.subscribe_all(&as_client(&both));
    source.subscribe_for(&as_client(&both), GPS);
    assert_eq!(source.client_count(), 3);

    source.publish(sample(&pool, GPS, b"$GP"));
    source.publish(sample(&pool, TEMP, b"21"));

    assert_eq!(all.count(), 2);
    assert_eq!(gps_only.count(), 1);
    // registered both ways: two deliveries of the GPS sample
    assert_eq!(both.count(), 3);
    assert_eq!(pool.stats().checked_out, 0);
}

#[test]
fn type_bits_do_not_affect_routing() {
    let source = SampleSource::new();
    let pool = SamplePool::new();
    let gps = Arc::new(Recorder::default());
    source.subscribe_for(&as_client(&gps), GPS.with_type(daq_core::SampleType::Float));
    source.publish(sample(&pool, GPS, b"x"));
    assert_eq!(gps.count(), 1);
}

#[test]
fn held_samples_return_to_pool_after_last_client_lets_go() {
    let source = SampleSource::new();
    let pool = SamplePool::new();
    let a = Arc::new(Recorder::keeping());
    let b = Arc::new(Recorder::keeping());
    source.subscribe_all(&as_client(&a));
    source.subscribe_all(&as_client(&b));

    source.publish_all((0..5).map(|i| sample(&pool, TEMP, &[i])));
    assert_eq!(pool.stats().checked_out, 5);
    {
        let kept = a.kept.lock();
        assert_eq!(kept.len(), 5);
        assert_eq!(kept[3].data(), &[3]);
        assert_eq!(kept[3].ref_count(), 2);
    }

    a.kept.lock().clear();
    assert_eq!(pool.stats().checked_out, 5);
    b.kept.lock().clear();
    assert_eq!(pool.stats().checked_out, 0);
    assert_eq!(pool.stats().free(), pool.stats().allocated);
}

struct OneShot {
    source: Arc<SampleSource<u8>>,
    me: OnceLock<Weak<dyn SampleClient<u8>>>,
    received: AtomicUsize,
}

impl SampleClient<u8> for OneShot {
    fn receive(&self, _sample: &Sample<u8>) -> bool {
        self.received.fetch_add(1, Ordering::SeqCst);
        if let Some(me) = self.me.get().and_then(Weak::upgrade) {
            self.source.remove_client(&me);
        }
        true
    }
}

#[test]
fn client_can_unsubscribe_itself_during_delivery() {
    let source = Arc::new(SampleSource::new());
    let pool = SamplePool::new();
    let one_shot = Arc::new(OneShot {
        source: Arc::clone(&source),
        me: OnceLock::new(),
        received: AtomicUsize::new(0),
    });
    let client: Arc<dyn SampleClient<u8>> = one_shot.clone();
    let _ = one_shot.me.set(Arc::downgrade(&client));
    source.subscribe_all(&client);
    source.subscribe_for(&client, GPS);

    source.publish(sample(&pool, GPS, b"1"));
    source.publish(sample(&pool, GPS, b"2"));

    // the id delivery removed both registrations before the all delivery ran
    assert_eq!(one_shot.received.load(Ordering::SeqCst), 1);
    assert_eq!(source.client_count(), 0);
    assert_eq!(pool.stats().checked_out, 0);
}

struct Unsubscriber {
    source: Arc<SampleSource<u8>>,
    victim: Arc<dyn SampleClient<u8>>,
}

impl SampleClient<u8> for Unsubscriber {
    fn receive(&self, _sample: &Sample<u8>) -> bool {
        self.source.unsubscribe_all(&self.victim);
        true
    }
}

#[test]
fn unsubscribed_client_is_skipped_within_the_same_publish() {
    let source = Arc::new(SampleSource::new());
    let pool = SamplePool::new();
    let victim = Arc::new(Recorder::default());
    let unsub: Arc<dyn SampleClient<u8>> = Arc::new(Unsubscriber {
        source: Arc::clone(&source),
        victim: as_client(&victim),
    });
    source.subscribe_all(&unsub);
    source.subscribe_all(&as_client(&victim));

    source.publish(sample(&pool, TEMP, b"1"));
    assert_eq!(victim.count(), 0);
    assert_eq!(source.client_count(), 1);
}

#[test]
fn flush_reaches_each_client_once() {
    let source = SampleSource::new();
    let a = Arc::new(Recorder::default());
    let b = Arc::new(Recorder::default());
    source.subscribe_all(&as_client(&a));
    source.subscribe_for(&as_client(&a), GPS);
    source.subscribe_for(&as_client(&b), TEMP);
    source.flush();
    assert_eq!(a.flushed.load(Ordering::SeqCst), 1);
    assert_eq!(b.flushed.load(Ordering::SeqCst), 1);

    source.remove_client(&as_client(&a));
    assert_eq!(source.client_count(), 1);
    source.unsubscribe_for(&as_client(&b), TEMP);
    assert_eq!(source.client_count(), 0);
}

#[test]
fn concurrent_publish_and_subscription_churn() {
    const PUBLISHERS: usize = 4;
    const PER_THREAD: usize = 2_000;

    let source = Arc::new(SampleSource::new());
    let pool = SamplePool::new();
    let steady = Arc::new(Recorder::default());
    source.subscribe_all(&as_client(&steady));

    let churn = Arc::new(Recorder::keeping());
    let churn_client = as_client(&churn);

    thread::scope(|scope| {
        for t in 0..PUBLISHERS {
            let source = Arc::clone(&source);
            let pool = pool.clone();
            scope.spawn(move || {
                for i in 0..PER_THREAD {
                    let id = if i % 2 == 0 { GPS } else { TEMP };
                    source.publish(sample(&pool, id, &[t as u8, i as u8]));
                }
            });
        }
        let source = Arc::clone(&source);
        let churn_client = Arc::clone(&churn_client);
        let churn = Arc::clone(&churn);
        scope.spawn(move || {
            for i in 0..500 {
                source.subscribe_for(&churn_client, GPS);
                source.subscribe_all(&churn_client);
                source.remove_client(&churn_client);
                if i % 50 == 0 {
                    churn.kept.lock().clear();
                }
            }
        });
    });

    assert_eq!(steady.count(), PUBLISHERS * PER_THREAD);
    churn.kept.lock().clear();
    let stats = pool.stats();
    assert_eq!(stats.checked_out, 0);
    assert!(stats.is_consistent());
}

proptest! {
    #[test]
    fn delivery_count_matches_registrations(
        registrations in prop::collection::vec((0usize..4, prop::option::of(0u16..3)), 0..12),
        published in prop::collection::vec(0u16..3, 0..20),
    ) {
        let source = SampleSource::new();
        let pool = SamplePool::new();
        let recorders: Vec<Arc<Recorder>> = (0..4).map(|_| Arc::new(Recorder::default())).collect();
        for (client, id) in &registrations {
            let c = as_client(&recorders[*client]);
            match id {
                Some(id) => source.subscribe_for(&c, SampleId::new(1, *id)),
                None => source.subscribe_all(&c),
            }
        }
        for id in &published {
            source.publish(sample(&pool, SampleId::new(1, *id), b"x"));
        }

        for (i, recorder) in recorders.iter().enumerate() {
            let all = registrations.iter().any(|(c, id)| *c == i && id.is_none());
            let expected: usize = published
                .iter()
                .map(|p| {
                    let by_id = registrations.iter().any(|(c, id)| *c == i && *id == Some(*p));
                    usize::from(all) + usize::from(by_id)
                })
                .sum();
            prop_assert_eq!(recorder.count(), expected);
        }
        prop_assert_eq!(pool.stats().checked_out, 0);
    }
}
