/*!
 * Thread Registry
 * Per-thread object store with lookup index and LIFO teardown ordering
 */

use crate::core::errors::{Result, StoreError};
use crate::core::id::Generation;
use crate::core::types::{Context, ExitCallback};
use crate::key::{KeyHandle, KeyRegistry};
use crate::store::cell::{Cell, CellIndex, CellKind, CELL_HEADER_BYTES};
use crate::store::exit::ExitBlock;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::time::Instant;

/// Teardown statistics
#[derive(Debug, Clone, Default)]
pub struct TeardownStats {
    pub cells_destroyed: usize,
    pub callbacks_run: usize,
    pub bytes_freed: usize,
    pub teardown_duration_micros: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistryState {
    Active,
    TornDown,
}

/// Per-thread object store
///
/// Owns every cell created on its thread. Dual bookkeeping, both free of
/// interior pointers: an arena of cells addressed by stable indices, an
/// ordered index for key resolution, and a creation-order sequence that
/// drives strict LIFO teardown. The order sequence is a superset of index
/// membership; anonymous exit-chain cells appear only in the sequence.
///
/// A registry is single-thread-owned by construction: every operation takes
/// `&mut self`, so the borrow checker enforces what the original design
/// documented as a threading rule.
pub struct ThreadRegistry {
    cells: Vec<Option<Cell>>,
    free: Vec<CellIndex>,
    index: BTreeMap<u32, CellIndex>,
    order: Vec<CellIndex>,
    state: RegistryState,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            cells: Vec::new(),
            free: Vec::new(),
            index: BTreeMap::new(),
            order: Vec::new(),
            state: RegistryState::Active,
        }
    }

    /// Resolve a key to its cell storage, never creating one
    ///
    /// Returns `Ok(None)` when the key has no cell on this thread; no
    /// allocation happens on that path. A cell left behind by a destroyed key
    /// whose slot was recycled is evicted here and reported as a miss.
    pub fn get(&mut self, keys: &KeyRegistry, key: KeyHandle) -> Result<Option<&mut [u8]>> {
        if keys.descriptor(key).is_none() {
            return Err(dead_key(key));
        }
        match self.lookup_live(key) {
            Some(idx) => Ok(Some(self.storage_mut(idx))),
            None => Ok(None),
        }
    }

    /// Resolve a key to its cell storage, creating the cell on first use
    ///
    /// On a miss: the combined header+storage size is checked for overflow,
    /// storage is zero-filled, and the key's constructor (if any) runs before
    /// any bookkeeping. A failing constructor frees the allocation, leaves
    /// the index and order sequence untouched, and propagates its exact code.
    /// On success the cell joins the tail of the creation-order sequence and
    /// the lookup index.
    ///
    /// The returned storage address is stable for the life of the cell:
    /// repeated calls for the same key return the same bytes.
    pub fn require(&mut self, keys: &KeyRegistry, key: KeyHandle) -> Result<&mut [u8]> {
        let desc = keys.descriptor(key).ok_or_else(|| dead_key(key))?;

        let idx = match self.lookup_live(key) {
            Some(idx) => idx,
            None => {
                if desc.size.checked_add(CELL_HEADER_BYTES).is_none() {
                    return Err(StoreError::OutOfMemory {
                        requested: desc.size,
                    });
                }
                let mut storage = vec![0u8; desc.size].into_boxed_slice();
                if let Some(constructor) = desc.constructor {
                    constructor(desc.context, &mut storage)
                        .map_err(|code| StoreError::ConstructorFailed(code.get()))?;
                }
                debug!(
                    "Created cell for key slot {} generation {} ({} bytes)",
                    key.slot, key.generation, desc.size
                );
                self.append_cell(
                    Some((key.slot, key.generation)),
                    CellKind::Data {
                        storage,
                        destructor: desc.destructor,
                        context: desc.context,
                    },
                )
            }
        };
        Ok(self.storage_mut(idx))
    }

    /// Register a callback to run at thread teardown
    ///
    /// Amortized O(1): the tail cell of the creation-order sequence is reused
    /// while it is an exit block with spare capacity; otherwise a fresh
    /// anonymous block is appended through the same cell-creation path.
    /// Callbacks run at teardown in the exact reverse of registration order,
    /// independent of block boundaries. Registration during teardown is
    /// rejected.
    pub fn at_thread_exit(&mut self, callback: ExitCallback, context: Context) -> Result<()> {
        if self.state != RegistryState::Active {
            return Err(StoreError::InvalidHandle(
                "thread registry is being torn down".into(),
            ));
        }

        let tail = self.order.last().copied().filter(|&idx| {
            matches!(
                self.cells.get(idx as usize).and_then(|slot| slot.as_ref()),
                Some(Cell {
                    kind: CellKind::ExitChain(block),
                    ..
                }) if !block.is_full()
            )
        });
        let idx = match tail {
            Some(idx) => idx,
            None => self.append_cell(None, CellKind::ExitChain(ExitBlock::new())),
        };

        if let Some(Cell {
            kind: CellKind::ExitChain(block),
            ..
        }) = self.cells.get_mut(idx as usize).and_then(|slot| slot.as_mut())
        {
            block.push(callback, context);
        }
        Ok(())
    }

    /// Destroy every cell, newest first
    ///
    /// Walks the creation-order sequence tail to head, taking each cell out
    /// of the arena before running its destructor, so a later-constructed
    /// cell that references an earlier one is destroyed first. Exit blocks
    /// drain their callbacks in reverse fill order. Runs to completion and is
    /// idempotent; Drop invokes it if the host never does.
    pub fn teardown(&mut self) -> TeardownStats {
        if self.state == RegistryState::TornDown {
            return TeardownStats::default();
        }
        self.state = RegistryState::TornDown;

        let start = Instant::now();
        let mut stats = TeardownStats::default();

        while let Some(idx) = self.order.pop() {
            let Some(cell) = self.cells.get_mut(idx as usize).and_then(|slot| slot.take()) else {
                continue;
            };
            stats.bytes_freed += cell.storage_bytes();
            match cell.kind {
                CellKind::Data {
                    mut storage,
                    destructor,
                    context,
                } => {
                    if let Some(destructor) = destructor {
                        destructor(context, &mut storage);
                    }
                }
                CellKind::ExitChain(mut block) => {
                    stats.callbacks_run += block.run();
                }
            }
            stats.cells_destroyed += 1;
        }

        self.cells.clear();
        self.free.clear();
        self.index.clear();

        stats.teardown_duration_micros = start.elapsed().as_micros() as u64;
        if stats.cells_destroyed > 0 {
            info!(
                "Tore down thread registry: {} cells destroyed, {} callbacks run, {} bytes freed ({}μs)",
                stats.cells_destroyed, stats.callbacks_run, stats.bytes_freed,
                stats.teardown_duration_micros
            );
        } else {
            debug!("Tore down empty thread registry");
        }
        stats
    }

    /// Number of live cells, exit blocks included
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Find the live cell for a key, evicting a stale one from a recycled
    /// slot
    ///
    /// A hit on the slot index whose stored generation differs from the
    /// handle's means the slot was destroyed and recycled while this thread
    /// kept the old tenant's cell. The stale cell is destroyed on the spot
    /// and the lookup reports a miss.
    fn lookup_live(&mut self, key: KeyHandle) -> Option<CellIndex> {
        let idx = *self.index.get(&key.slot)?;
        let cell_generation = self
            .cells
            .get(idx as usize)
            .and_then(|slot| slot.as_ref())
            .and_then(|cell| cell.key)
            .map(|(_, generation)| generation)?;

        if cell_generation == key.generation {
            return Some(idx);
        }

        warn!(
            "Evicting stale cell on recycled key slot {} (cell generation {}, key generation {})",
            key.slot, cell_generation, key.generation
        );
        self.evict(idx);
        None
    }

    /// Append a cell to the arena, the order sequence and (if keyed) the index
    fn append_cell(&mut self, key: Option<(u32, Generation)>, kind: CellKind) -> CellIndex {
        let cell = Cell { key, kind };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.cells[idx as usize] = Some(cell);
                idx
            }
            None => {
                self.cells.push(Some(cell));
                (self.cells.len() - 1) as CellIndex
            }
        };
        self.order.push(idx);
        if let Some((slot, _)) = key {
            self.index.insert(slot, idx);
        }
        idx
    }

    /// Destroy one cell out of creation order (stale eviction only)
    fn evict(&mut self, idx: CellIndex) {
        let Some(cell) = self.cells.get_mut(idx as usize).and_then(|slot| slot.take()) else {
            return;
        };
        if let Some((slot, _)) = cell.key {
            self.index.remove(&slot);
        }
        // Eviction is rare; a linear unlink from the order sequence is fine.
        if let Some(pos) = self.order.iter().rposition(|&i| i == idx) {
            self.order.remove(pos);
        }
        self.free.push(idx);

        if let CellKind::Data {
            mut storage,
            destructor,
            context,
        } = cell.kind
        {
            if let Some(destructor) = destructor {
                destructor(context, &mut storage);
            }
        }
    }

    fn storage_mut(&mut self, idx: CellIndex) -> &mut [u8] {
        match self.cells.get_mut(idx as usize).and_then(|slot| slot.as_mut()) {
            Some(Cell {
                kind: CellKind::Data { storage, .. },
                ..
            }) => storage,
            // Unreachable for indices produced by lookup_live/append_cell.
            _ => &mut [],
        }
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadRegistry {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn dead_key(key: KeyHandle) -> StoreError {
    StoreError::InvalidHandle(format!(
        "key slot {} generation {} has been destroyed",
        key.slot, key.generation
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Context;

    fn noop_exit(_context: Context) {}

    #[test]
    fn test_exit_blocks_are_never_indexed() {
        let mut registry = ThreadRegistry::new();
        registry.at_thread_exit(noop_exit, 0).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.index.is_empty());
        assert_eq!(registry.order.len(), 1);
    }

    #[test]
    fn test_keyed_cells_join_index_and_order() {
        let keys = KeyRegistry::new();
        let key = keys.create(16, None, None, 0).unwrap();

        let mut registry = ThreadRegistry::new();
        registry.require(&keys, key).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.index.len(), 1);
        assert_eq!(registry.order.len(), 1);
    }

    #[test]
    fn test_storage_is_zero_filled() {
        let keys = KeyRegistry::new();
        let key = keys.create(32, None, None, 0).unwrap();

        let mut registry = ThreadRegistry::new();
        let storage = registry.require(&keys, key).unwrap();
        assert!(storage.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_arena_slot_reuse_after_eviction() {
        let keys = KeyRegistry::new();
        let old = keys.create(8, None, None, 0).unwrap();

        let mut registry = ThreadRegistry::new();
        registry.require(&keys, old).unwrap();
        keys.destroy(old).unwrap();

        // Same slot id, new generation: the lookup evicts the stale cell and
        // the vacated arena slot is handed to the replacement.
        let new = keys.create(8, None, None, 0).unwrap();
        assert_eq!(old.slot, new.slot);
        registry.require(&keys, new).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.cells.iter().filter(|slot| slot.is_some()).count(), 1);
    }
}
