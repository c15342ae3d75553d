/*!
 * Exit Callback Chain
 * Fixed-capacity blocks of deferred at-thread-exit callbacks
 */

use crate::core::types::{Context, ExitCallback};

/// Callbacks batched per anonymous cell
///
/// A tunable constant: block boundaries never affect invocation order.
pub const CALLBACKS_PER_BLOCK: usize = 64;

/// One block of deferred callbacks, run in reverse fill order
pub(crate) struct ExitBlock {
    entries: Vec<(ExitCallback, Context)>,
}

impl ExitBlock {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(CALLBACKS_PER_BLOCK),
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= CALLBACKS_PER_BLOCK
    }

    #[inline]
    pub fn push(&mut self, callback: ExitCallback, context: Context) {
        self.entries.push((callback, context));
    }

    /// Run and drain all entries, last-appended first
    ///
    /// Returns the number of callbacks invoked.
    pub fn run(&mut self) -> usize {
        let count = self.entries.len();
        while let Some((callback, context)) = self.entries.pop() {
            callback(context);
        }
        count
    }
}
