/*!
 * ID Generation System
 * Generation counters and recyclable slot ids for key identity
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

// ============================================================================
// Type-Safe ID Wrappers
// ============================================================================

/// Key generation id, strictly increasing process-wide and never reused
///
/// Comparing generations, not slot numbers or addresses, is what makes a
/// recycled key slot distinguishable from its previous tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Generation Counter
// ============================================================================

/// Process-wide generation counter
///
/// Uniqueness is the only requirement, so the increment is relaxed; no other
/// field of a key descriptor is published through this counter.
#[derive(Debug)]
pub(crate) struct GenerationCounter {
    counter: AtomicU64,
}

impl GenerationCounter {
    #[inline]
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn next(&self) -> Generation {
        Generation(self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Slot Allocator
// ============================================================================

/// Key slot allocator with recycling support
///
/// Uses a lock-free queue for recycled slots and falls back to an atomic
/// counter when no recycled slot is available. Recycling keeps the slot space
/// dense for long-running processes that churn keys.
#[derive(Debug)]
pub(crate) struct SlotAllocator {
    counter: AtomicU32,
    free_list: crossbeam_queue::SegQueue<u32>,
}

impl SlotAllocator {
    #[inline]
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(1),
            free_list: crossbeam_queue::SegQueue::new(),
        }
    }

    /// Allocate a slot id, recycling a released one when possible
    ///
    /// Returns `None` once the id space is exhausted.
    #[inline]
    pub fn allocate(&self) -> Option<u32> {
        if let Some(slot) = self.free_list.pop() {
            return Some(slot);
        }
        // Pins at the ceiling instead of wrapping into already-issued ids.
        self.counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |slot| {
                slot.checked_add(1)
            })
            .ok()
    }

    #[inline]
    pub fn release(&self, slot: u32) {
        self.free_list.push(slot);
    }
}

// ============================================================================
// Tests
// ============================================================================
