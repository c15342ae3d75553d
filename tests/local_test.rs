/*!
 * Self-Managed Lifecycle Tests
 * Tests for the process-global key registry and per-thread slot
 */

use parking_lot::Mutex;
use serial_test::serial;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use threadstore::local;
use threadstore::StoreError;

static EXIT_DTOR_RUNS: AtomicUsize = AtomicUsize::new(0);

fn exit_dtor(_context: usize, _storage: &mut [u8]) {
    EXIT_DTOR_RUNS.fetch_add(1, Ordering::SeqCst);
}

#[test]
#[serial]
fn test_thread_exit_tears_down_automatically() {
    let key = local::alloc_key(8, None, Some(exit_dtor), 0).unwrap();

    thread::spawn(move || {
        local::with_require(key, |storage| storage[0] = 9).unwrap();
        let seen = local::with_get(key, |storage| storage.map(|s| s[0])).unwrap();
        assert_eq!(seen, Some(9));
    })
    .join()
    .unwrap();

    // The slot destructor ran teardown before the thread finished.
    assert_eq!(EXIT_DTOR_RUNS.load(Ordering::SeqCst), 1);
    local::free_key(key).unwrap();
}

static EXIT_CALLBACK_ORDER: Mutex<Vec<usize>> = Mutex::new(Vec::new());

fn record_exit(context: usize) {
    EXIT_CALLBACK_ORDER.lock().push(context);
}

#[test]
#[serial]
fn test_exit_callbacks_run_at_thread_exit_in_reverse() {
    thread::spawn(|| {
        local::at_thread_exit(record_exit, 1).unwrap();
        local::at_thread_exit(record_exit, 2).unwrap();
        local::at_thread_exit(record_exit, 3).unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(*EXIT_CALLBACK_ORDER.lock(), vec![3, 2, 1]);
}

#[test]
#[serial]
fn test_cleanup_current_thread_kills_the_slot() {
    let key = local::alloc_key(8, None, None, 0).unwrap();

    thread::spawn(move || {
        local::with_require(key, |_storage| ()).unwrap();

        let stats = local::cleanup_current_thread().unwrap();
        assert_eq!(stats.cells_destroyed, 1);

        // The dying thread never gets a fresh registry.
        assert!(matches!(
            local::with_require(key, |_storage| ()),
            Err(StoreError::InvalidHandle(_))
        ));
        assert!(matches!(
            local::at_thread_exit(record_exit, 0),
            Err(StoreError::InvalidHandle(_))
        ));
        assert!(local::cleanup_current_thread().is_none());
    })
    .join()
    .unwrap();

    local::free_key(key).unwrap();
}

#[test]
#[serial]
fn test_with_get_on_vacant_thread_does_not_install() {
    let key = local::alloc_key(8, None, None, 0).unwrap();

    thread::spawn(move || {
        let absent = local::with_get(key, |storage| storage.is_none()).unwrap();
        assert!(absent);

        // No registry was installed by the lookup.
        assert!(local::cleanup_current_thread().is_none());
    })
    .join()
    .unwrap();

    local::free_key(key).unwrap();
}

static INDEPENDENT_CTOR_RUNS: AtomicUsize = AtomicUsize::new(0);

fn independent_ctor(_context: usize, _storage: &mut [u8]) -> Result<(), NonZeroU32> {
    INDEPENDENT_CTOR_RUNS.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

#[test]
#[serial]
fn test_threads_have_independent_cells() {
    let key = local::alloc_key(8, Some(independent_ctor), None, 0).unwrap();

    let writer = |value: u8| {
        thread::spawn(move || {
            local::with_require(key, move |storage| storage[0] = value).unwrap();
            let seen = local::with_get(key, |storage| storage.map(|s| s[0])).unwrap();
            assert_eq!(seen, Some(value));
        })
    };

    let t1 = writer(11);
    let t2 = writer(22);
    t1.join().unwrap();
    t2.join().unwrap();

    // One construction per thread, no sharing.
    assert_eq!(INDEPENDENT_CTOR_RUNS.load(Ordering::SeqCst), 2);
    local::free_key(key).unwrap();
}
