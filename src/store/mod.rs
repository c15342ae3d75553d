/*!
 * Store Module
 * Per-thread object store: cells, lookup index, exit chain, teardown
 */

mod cell;
mod exit;
mod registry;

pub use exit::CALLBACKS_PER_BLOCK;
pub use registry::{TeardownStats, ThreadRegistry};
