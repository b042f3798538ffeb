//! Property tests for pool accounting and reference counting.

use daq_pool::{Sample, SamplePool};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Acquire(usize),
    Hold(usize),
    Release(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..2000).prop_map(Op::Acquire),
        any::<usize>().prop_map(Op::Hold),
        any::<usize>().prop_map(Op::Release),
    ]
}

proptest! {
    #[test]
    fn accounting_identity_holds_after_every_call(ops in prop::collection::vec(op(), 1..200)) {
        let pool = SamplePool::<u8>::new();
        let mut handles: Vec<Sample<u8>> = Vec::new();
        for op in ops {
            match op {
                Op::Acquire(len) => {
                    let s = pool.acquire(len).unwrap();
                    prop_assert_eq!(s.len(), len);
                    prop_assert!(s.allocated_len() >= len);
                    handles.push(s.freeze());
                }
                Op::Hold(i) if !handles.is_empty() => {
                    let held = handles[i % handles.len()].hold();
                    handles.push(held);
                }
                Op::Release(i) if !handles.is_empty() => {
                    let idx = i % handles.len();
                    handles.swap_remove(idx).release();
                }
                _ => {}
            }
            let stats = pool.stats();
            prop_assert!(stats.is_consistent(), "{:?}", stats);
        }
        drop(handles);
        let stats = pool.stats();
        prop_assert_eq!(stats.checked_out, 0);
        prop_assert_eq!(stats.allocated, stats.free());
    }

    #[test]
    fn sample_returns_only_after_last_release(holders in 1usize..16, fill in any::<u8>()) {
        let pool = SamplePool::<u8>::new();
        let mut s = pool.acquire(32).unwrap();
        s.data_mut().fill(fill);
        let first = s.freeze();
        let mut refs: Vec<Sample<u8>> = (1..holders).map(|_| first.hold()).collect();
        refs.push(first);

        while refs.len() > 1 {
            refs.pop();
            prop_assert_eq!(pool.stats().checked_out, 1);
            // a new acquire must not hand out the shared buffer
            let other = pool.acquire(32).unwrap();
            prop_assert_ne!(other.data().as_ptr(), refs[0].data().as_ptr());
            drop(other);
            prop_assert!(refs[0].data().iter().all(|b| *b == fill));
        }
        prop_assert_eq!(refs[0].ref_count(), 1);
        refs.clear();
        prop_assert_eq!(pool.stats().checked_out, 0);
    }
}

#[test]
fn concurrent_acquire_and_release_keeps_accounting() {
    let pool = SamplePool::<f32>::new();
    let threads: Vec<_> = (0..8)
        .map(|t| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let mut kept = Vec::new();
                for i in 0..500usize {
                    let len = (i * 37 + t * 11) % 900;
                    let s = pool.acquire(len).unwrap().freeze();
                    if i % 3 == 0 {
                        kept.push(s.hold());
                    }
                    drop(s);
                    if kept.len() > 10 {
                        kept.remove(0);
                    }
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    let stats = pool.stats();
    assert_eq!(stats.checked_out, 0);
    assert!(stats.is_consistent());
}
