/*!
 * Storage Cells
 * Live storage instances backing one (thread, key) pair
 */

use crate::core::id::Generation;
use crate::core::types::{Context, Destructor};
use crate::store::exit::ExitBlock;

/// Arena index of a cell within its thread registry
pub(crate) type CellIndex = u32;

/// Header size accounted against a cell's storage request
///
/// Storage is a separate allocation from the header, but the combined size
/// must still be representable; `require` checks this before allocating.
pub(crate) const CELL_HEADER_BYTES: usize = std::mem::size_of::<Cell>();

/// One live storage instance
///
/// Shape is immutable after creation; only the storage bytes change. Cells
/// owned by a key carry the key's (slot, generation) identity; anonymous
/// cells (`key == None`) back the exit callback chain and are reachable only
/// through the creation-order sequence, never the lookup index.
pub(crate) struct Cell {
    pub key: Option<(u32, Generation)>,
    pub kind: CellKind,
}

pub(crate) enum CellKind {
    /// Keyed storage: zero-filled at creation, destroyed with the destructor
    /// and context captured from the key descriptor
    Data {
        storage: Box<[u8]>,
        destructor: Option<Destructor>,
        context: Context,
    },
    /// Batch of deferred at-thread-exit callbacks
    ExitChain(ExitBlock),
}

impl Cell {
    /// Storage bytes held by this cell (exit chains hold none)
    pub fn storage_bytes(&self) -> usize {
        match &self.kind {
            CellKind::Data { storage, .. } => storage.len(),
            CellKind::ExitChain(_) => 0,
        }
    }
}
