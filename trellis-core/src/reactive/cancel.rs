//! Cancellation for async completions.
//!
//! An async operation started by an effect owns no cells. When it finishes
//! it writes its result into a cell it was handed. If the effect has re-run
//! or been torn down in the meantime, that write would overwrite newer state
//! with a stale result.
//!
//! The discipline: the effect creates a [`CancelToken`], gives the operation
//! a [`GuardedWriter`] bound to it, and cancels the token from its cleanup.
//! A completion arriving after cancellation is dropped.
//!
//! ```rust,ignore
//! Effect::new(&rt, &[&resource], move || {
//!     let token = CancelToken::new();
//!     let writer = items.guarded(token.clone());
//!     spawn_fetch(resource.read(), writer);
//!     Some(Cleanup::new(move || token.cancel()))
//! });
//! ```

use std::cell::Cell as Slot;
use std::rc::Rc;

use tracing::debug;

use super::cell::Cell;
use crate::error::Result;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Rc<Slot<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// A one-shot writer for an async completion.
pub struct GuardedWriter<T: 'static> {
    cell: Cell<T>,
    token: CancelToken,
}

impl<T: 'static> GuardedWriter<T> {
    pub(crate) fn new(cell: Cell<T>, token: CancelToken) -> Self {
        Self { cell, token }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Write `value` unless the token was cancelled.
    ///
    /// Returns `Ok(false)` when the completion was stale and dropped.
    pub fn complete(self, value: T) -> Result<bool> {
        if self.token.is_cancelled() {
            debug!(cell = %self.cell.id(), "dropping stale async completion");
            return Ok(false);
        }
        self.cell.write(value)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Runtime;

    #[test]
    fn token_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn live_writer_writes() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let writer = cell.guarded(CancelToken::new());

        assert!(writer.complete(7).unwrap());
        rt.flush().unwrap();
        assert_eq!(cell.read(), 7);
    }

    #[test]
    fn cancelled_writer_drops_value() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let token = CancelToken::new();
        let writer = cell.guarded(token.clone());

        token.cancel();
        assert!(writer.is_cancelled());
        assert!(!writer.complete(7).unwrap());
        assert!(!cell.is_staged());
        assert!(!rt.has_pending_writes());
    }
}
