/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage subsystem errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum StoreError {
    #[error("Out of memory: requested {requested} bytes")]
    #[diagnostic(
        code(threadstore::out_of_memory),
        help("The requested cell size cannot be represented or the key id space is exhausted.")
    )]
    OutOfMemory { requested: usize },

    #[error("Invalid handle: {0}")]
    #[diagnostic(
        code(threadstore::invalid_handle),
        help("The key or thread registry this handle referred to no longer exists.")
    )]
    InvalidHandle(String),

    #[error("Constructor failed with code {0}")]
    #[diagnostic(
        code(threadstore::constructor_failed),
        help("A user-supplied cell constructor reported failure; the code is propagated verbatim.")
    )]
    ConstructorFailed(u32),
}

/// Result type for storage operations
///
/// # Must Use
/// Storage operations can fail and must be handled to prevent stale-handle bugs
pub type Result<T> = std::result::Result<T, StoreError>;
