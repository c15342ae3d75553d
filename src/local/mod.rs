/*!
 * Self-Managed Lifecycle
 * Process-global key registry plus a per-thread slot installed on first use
 *
 * The explicit-handle API (`ThreadRegistry` threaded through every call) is
 * the primary integration surface; this module serves hosts without a
 * thread-lifecycle hook. A registry is installed lazily into a thread-local
 * slot on first `with_require`/`at_thread_exit`, and torn down either by an
 * explicit `cleanup_current_thread` or by the slot's own destructor when the
 * thread exits. After teardown the slot is dead: the dying thread never gets
 * a fresh registry.
 */

use crate::core::errors::{Result, StoreError};
use crate::core::types::{Constructor, Context, Destructor, ExitCallback, Size};
use crate::key::{KeyHandle, KeyRegistry};
use crate::store::{TeardownStats, ThreadRegistry};
use std::cell::RefCell;
use std::sync::OnceLock;

static KEYS: OnceLock<KeyRegistry> = OnceLock::new();

enum Slot {
    Vacant,
    Live(ThreadRegistry),
    Dead,
}

thread_local! {
    static CURRENT: RefCell<Slot> = RefCell::new(Slot::Vacant);
}

/// The process-wide key registry backing this module
pub fn keys() -> &'static KeyRegistry {
    KEYS.get_or_init(KeyRegistry::new)
}

/// Create a key in the process-wide registry
pub fn alloc_key(
    size: Size,
    constructor: Option<Constructor>,
    destructor: Option<Destructor>,
    context: Context,
) -> Result<KeyHandle> {
    keys().create(size, constructor, destructor, context)
}

/// Destroy a key in the process-wide registry
pub fn free_key(key: KeyHandle) -> Result<()> {
    keys().destroy(key)
}

/// Read access to the calling thread's cell for `key`, without creating it
///
/// The closure receives `None` when no cell exists on this thread; nothing is
/// allocated on that path, and a vacant thread slot stays vacant.
pub fn with_get<R>(key: KeyHandle, f: impl FnOnce(Option<&mut [u8]>) -> R) -> Result<R> {
    CURRENT
        .try_with(|cell| {
            let mut slot = cell.borrow_mut();
            match &mut *slot {
                Slot::Live(registry) => {
                    let storage = registry.get(keys(), key)?;
                    Ok(f(storage))
                }
                Slot::Vacant => {
                    if keys().contains(key) {
                        Ok(f(None))
                    } else {
                        Err(StoreError::InvalidHandle(format!(
                            "key generation {} has been destroyed",
                            key.generation()
                        )))
                    }
                }
                Slot::Dead => Err(dead_thread()),
            }
        })
        .unwrap_or_else(|_| Err(shutting_down()))
}

/// Access the calling thread's cell for `key`, creating it on first use
///
/// Runs the key's constructor on first access, then hands the storage to the
/// closure. Re-entrant use from inside a constructor or destructor panics via
/// the underlying `RefCell`; that recursion is a contract violation.
pub fn with_require<R>(key: KeyHandle, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
    with_registry(|registry| {
        let storage = registry.require(keys(), key)?;
        Ok(f(storage))
    })
}

/// Register a callback to run when the calling thread tears down
pub fn at_thread_exit(callback: ExitCallback, context: Context) -> Result<()> {
    with_registry(|registry| registry.at_thread_exit(callback, context))
}

/// Tear down the calling thread's registry now
///
/// For hosts that drive thread exit themselves; the slot destructor performs
/// the same teardown for threads that never call this. Returns `None` when
/// the thread has no registry, and marks the slot dead either way: later
/// operations on this thread fail with `InvalidHandle`.
pub fn cleanup_current_thread() -> Option<TeardownStats> {
    CURRENT
        .try_with(|cell| {
            let mut slot = cell.borrow_mut();
            match std::mem::replace(&mut *slot, Slot::Dead) {
                Slot::Live(mut registry) => Some(registry.teardown()),
                Slot::Vacant | Slot::Dead => None,
            }
        })
        .ok()
        .flatten()
}

fn with_registry<R>(f: impl FnOnce(&mut ThreadRegistry) -> Result<R>) -> Result<R> {
    CURRENT
        .try_with(|cell| {
            let mut slot = cell.borrow_mut();
            if matches!(&*slot, Slot::Vacant) {
                *slot = Slot::Live(ThreadRegistry::new());
            }
            match &mut *slot {
                Slot::Live(registry) => f(registry),
                Slot::Vacant | Slot::Dead => Err(dead_thread()),
            }
        })
        .unwrap_or_else(|_| Err(shutting_down()))
}

fn dead_thread() -> StoreError {
    StoreError::InvalidHandle("thread storage already torn down".into())
}

fn shutting_down() -> StoreError {
    StoreError::InvalidHandle("thread storage unavailable during thread shutdown".into())
}
