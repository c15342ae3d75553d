/*!
 * Core Types
 * Common types shared across the storage subsystem
 */

use std::num::NonZeroU32;

/// Size type for cell storage
pub type Size = usize;

/// Opaque context value threaded through constructors, destructors and
/// exit callbacks
pub type Context = usize;

/// Cell constructor, invoked once over freshly zeroed storage
///
/// A non-zero failure code aborts the `require` that triggered construction
/// and is propagated verbatim as `StoreError::ConstructorFailed`.
pub type Constructor = fn(Context, &mut [u8]) -> Result<(), NonZeroU32>;

/// Cell destructor, invoked exactly once at eviction or teardown
///
/// Destructors are infallible by contract.
pub type Destructor = fn(Context, &mut [u8]);

/// Deferred callback run at thread exit
pub type ExitCallback = fn(Context);
