/*!
 * Key Module
 * Key descriptors and the process-shared key registry
 */

mod registry;

pub use registry::{KeyHandle, KeyRegistry};
