//! Quiescence barrier against a live background compaction thread.

mod common;

use std::time::{Duration, Instant};

use lsm_benchmarks::barrier::CompactionBarrier;
use lsm_benchmarks::store::{IntProperty, SimOptions, SimStore, Store};
use tempfile::TempDir;

#[test]
fn idle_store_returns_on_first_poll() {
    let dir = TempDir::new().unwrap();
    let store = common::open_sim(&dir);
    store.put(b"k", b"v").unwrap();
    let barrier = CompactionBarrier::attach(&store);

    let start = Instant::now();
    let outcome = barrier
        .wait_until_idle(&store, Duration::from_secs(2))
        .unwrap();
    assert_eq!(outcome.polls, 1);
    assert_eq!(outcome.notifications, 0);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!barrier.state().compaction_complete());
}

#[test]
fn waits_for_delayed_compaction() {
    let dir = TempDir::new().unwrap();
    let options = SimOptions {
        compaction_delay: Duration::from_millis(150),
        ..common::small_options()
    };
    let store = SimStore::open_with(&dir.path().join("db"), options).unwrap();
    let barrier = CompactionBarrier::attach(&store);

    for i in 0..3u32 {
        store.put(format!("k{}", i).as_bytes(), b"v").unwrap();
        store.flush_live_files().unwrap();
    }

    let outcome = barrier
        .wait_until_idle(&store, Duration::from_secs(5))
        .unwrap();
    assert!(outcome.polls >= 2);
    assert!(outcome.notifications >= 1);
    assert!(barrier.state().compaction_complete());
    for property in IntProperty::ALL {
        assert_eq!(store.int_property(property).unwrap(), 0, "{:?}", property);
    }
    // Woken by the notification, not by the poll timeout.
    assert!(outcome.waited < Duration::from_secs(5));
}

#[test]
fn observers_fire_on_the_compaction_thread() {
    let dir = TempDir::new().unwrap();
    let store = common::open_sim(&dir);
    let main_thread = std::thread::current().id();
    let (tx, rx) = std::sync::mpsc::channel();
    store.register_compaction_observer(std::sync::Arc::new(move || {
        let _ = tx.send(std::thread::current().id());
    }));
    for i in 0..2u32 {
        store.put(format!("k{}", i).as_bytes(), b"v").unwrap();
        store.flush_live_files().unwrap();
    }
    let fired_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_ne!(fired_on, main_thread);
}
