// Integration coverage for the six end-to-end scenarios in SPEC_FULL.md
// §8, exercised against the public `Store` façade with real OS threads.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use objstore_core::error::Error;
use objstore_core::transaction::backing::InMemoryBackingStoreFactory;
use objstore_core::{Store, StoreConfig};

fn new_store(cache_capacity: usize) -> Store<InMemoryBackingStoreFactory<i64>> {
    let config = StoreConfig { cache_capacity, ..StoreConfig::default() };
    Store::new(InMemoryBackingStoreFactory::new(1), config)
}

#[test]
fn scenario_1_independent_commits() {
    let store = new_store(10);

    let mut t1 = store.begin();
    let id1 = t1.create(42, "a").unwrap();
    t1.commit().unwrap();

    let mut t2 = store.begin();
    assert_eq!(t2.lookup("a").unwrap(), id1);
    assert_eq!(t2.peek(id1).unwrap(), Some(42));
    t2.commit().unwrap();
}

#[test]
fn scenario_2_write_conflict_serialization() {
    let store = Arc::new(new_store(10));

    let mut setup = store.begin();
    setup.create(100, "id").unwrap();
    setup.commit().unwrap();
    let id = 0; // first allocated id

    let mut t1 = store.begin();
    assert_eq!(t1.lock(id).unwrap(), 100);

    let (tx, rx) = mpsc::channel();
    let store2 = store.clone();
    let handle = thread::spawn(move || {
        let mut t2 = store2.begin();
        tx.send(()).unwrap();
        let value = t2.lock(id).unwrap();
        t2.commit().unwrap();
        value
    });

    rx.recv_timeout(Duration::from_secs(1)).unwrap();
    thread::sleep(Duration::from_millis(50));
    t1.commit().unwrap();

    let observed = handle.join().unwrap();
    assert_eq!(observed, 100);
}

#[test]
fn scenario_3_deadlock_resolution() {
    let store = Arc::new(new_store(10));

    let mut t1 = store.begin();
    t1.lock(1).unwrap();

    let store2 = store.clone();
    let (ready_tx, ready_rx) = mpsc::channel();
    let handle = thread::spawn(move || -> Result<(), Error> {
        let mut t2 = store2.begin();
        t2.lock(2)?;
        ready_tx.send(()).unwrap();
        t2.lock(1)?;
        t2.commit()?;
        Ok(())
    });

    ready_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    thread::sleep(Duration::from_millis(50));

    let result = t1.lock(2);
    assert!(matches!(result, Err(Error::Deadlock)));
    t1.abort().unwrap();

    handle.join().unwrap().unwrap();
}

#[test]
fn scenario_4_read_your_writes() {
    let store = new_store(10);

    let mut t1 = store.begin();
    let id = t1.create(1, "x").unwrap();
    assert_eq!(t1.peek(id).unwrap(), Some(1));
    assert_eq!(t1.lock(id).unwrap(), 1);
    // mutate: destroy + recreate under a fresh private entry is out of
    // this trait's surface; instead verify lock's cached value is what a
    // second lock call returns (idempotence), and that peek still agrees.
    assert_eq!(t1.lock(id).unwrap(), 1);
    assert_eq!(t1.peek(id).unwrap(), Some(1));
}

#[test]
fn scenario_5_abort_discards_writes() {
    let store = new_store(10);

    let mut t1 = store.begin();
    t1.create(9, "b").unwrap();
    t1.abort().unwrap();

    let mut t2 = store.begin();
    assert_eq!(t2.lookup("b").unwrap(), -1);
}

#[test]
fn scenario_6_eviction_under_pressure() {
    let store = new_store(2);

    let mut t1 = store.begin();
    let id1 = t1.create(1, "a").unwrap();
    t1.commit().unwrap();

    let mut t2 = store.begin();
    let id2 = t2.create(2, "b").unwrap();
    t2.commit().unwrap();

    let mut t3 = store.begin();
    let id3 = t3.create(3, "c").unwrap();
    t3.commit().unwrap();

    assert_eq!(store.shared_cache_len(), 2);

    // The evicted entry is still transparently re-fetchable through the
    // backing store.
    let mut t4 = store.begin();
    assert_eq!(t4.peek(id1).unwrap(), Some(1));
    assert_eq!(t4.peek(id2).unwrap(), Some(2));
    assert_eq!(t4.peek(id3).unwrap(), Some(3));
}

#[test]
fn abort_on_fresh_transaction_is_a_noop() {
    let store = new_store(10);
    let mut t1 = store.begin();
    assert!(t1.abort().is_ok());
    assert!(t1.abort().is_ok());
}

#[test]
fn peek_of_never_created_id_is_absent() {
    let store = new_store(10);
    let mut t1 = store.begin();
    assert_eq!(t1.peek(12345).unwrap(), None);
}

#[test]
fn lookup_of_unknown_name_is_absent_sentinel() {
    let store = new_store(10);
    let mut t1 = store.begin();
    assert_eq!(t1.lookup("never-bound").unwrap(), -1);
}

#[test]
fn cache_capacity_zero_preserves_functional_behavior() {
    let store = new_store(0);

    let mut t1 = store.begin();
    let id = t1.create(5, "z").unwrap();
    t1.commit().unwrap();
    assert_eq!(store.shared_cache_len(), 0);

    let mut t2 = store.begin();
    assert_eq!(t2.lookup("z").unwrap(), id);
    assert_eq!(t2.peek(id).unwrap(), Some(5));
}

#[test]
fn operations_after_commit_fail_with_invalid_state() {
    let store = new_store(10);
    let mut t1 = store.begin();
    let id = t1.create(1, "q").unwrap();
    t1.commit().unwrap();
    assert!(matches!(t1.peek(id), Err(Error::InvalidState(_))));
    assert!(matches!(t1.lock(id), Err(Error::InvalidState(_))));
}
