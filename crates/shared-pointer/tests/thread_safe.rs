//! Concurrent use of the `ThreadSafe` policy.

use alloc_checker::{DropCounter, DropProbe};
use shared_pointer::{ThreadSafeShared, ThreadSafeWeak};
use std::sync::{Arc, Barrier};
use std::thread;

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn thread_safe_handles_are_send_and_sync() {
    assert_send_sync::<ThreadSafeShared<String>>();
    assert_send_sync::<ThreadSafeWeak<String>>();
}

#[test]
fn clones_dropped_on_many_threads_destroy_once() {
    let drops = DropCounter::new();
    let p = ThreadSafeShared::new(drops.probe(1));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let local = p.clone();
            thread::spawn(move || {
                for _ in 0..1_000 {
                    let copy = local.clone();
                    assert_eq!(copy.get().value(), 1);
                }
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().is_ok());
    }

    assert_eq!(p.strong_count(), Some(1));
    assert_eq!(p.weak_count(), Some(1));
    drop(p);
    assert_eq!(drops.count(), 1);
}

#[test]
fn lock_races_with_last_release() {
    for _ in 0..200 {
        let drops = DropCounter::new();
        let owner = ThreadSafeShared::new(drops.probe(5));
        let weak = owner.downgrade();
        let barrier = Arc::new(Barrier::new(2));

        let locker = {
            let barrier = Arc::clone(&barrier);
            let mut weak = weak.clone();
            thread::spawn(move || {
                barrier.wait();
                let promoted: ThreadSafeShared<DropProbe> = weak.lock();
                // Either the value was alive and stays so, or nothing came back.
                promoted.try_get().map(DropProbe::value)
            })
        };

        barrier.wait();
        drop(owner);

        match locker.join() {
            Ok(Some(value)) => assert_eq!(value, 5),
            Ok(None) => {}
            Err(_) => unreachable!("locker thread panicked"),
        }
        assert_eq!(drops.count(), 1);
        assert!(weak.is_expired());
        assert_eq!(weak.strong_count(), Some(0));
        assert_eq!(weak.weak_count(), Some(1));
    }
}

#[test]
fn weak_handles_promote_concurrently() {
    let drops = DropCounter::new();
    let owner = ThreadSafeShared::new(drops.probe(9));
    let weak = owner.downgrade();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let mut weak = weak.clone();
            thread::spawn(move || {
                (0..500)
                    .filter(|_| {
                        let promoted = weak.lock();
                        promoted.try_get().is_some_and(|probe| probe.value() == 9)
                    })
                    .count()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().ok(), Some(500));
    }
    assert_eq!(owner.strong_count(), Some(1));
    assert_eq!(owner.weak_count(), Some(2));
    drop(owner);
    assert_eq!(drops.count(), 1);
    assert!(weak.upgrade().is_empty());
}
