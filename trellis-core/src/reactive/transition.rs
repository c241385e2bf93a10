//! Deferred updates.
//!
//! A transition splits one event into two batches: the urgent writes made
//! directly (an input's text) and the expensive writes made inside
//! [`Runtime::start_transition`] (the list filtered by that text).
//!
//! Writes made inside the transition closure are captured rather than
//! staged. They sit in a low-priority batch until the host calls
//! [`Runtime::flush_transitions`], normally once no urgent event is waiting.
//! Starting a new transition before that discards the older captured batch.
//!
//! [`Runtime::transition_pending`] is a cell that reads `true` from the flush
//! after a transition starts until the flush that applies it.

use tracing::debug;

use super::cell::CellReader;
use super::runtime::{DeferredWrite, FlushReport, Runtime};
use crate::error::Result;

struct TransitionBatch {
    seq: u64,
    writes: Vec<DeferredWrite>,
}

#[derive(Default)]
pub(crate) struct TransitionState {
    capturing: Option<Vec<DeferredWrite>>,
    queued: Option<TransitionBatch>,
    next_seq: u64,
}

impl TransitionState {
    pub(crate) fn is_capturing(&self) -> bool {
        self.capturing.is_some()
    }

    pub(crate) fn capture(&mut self, write: DeferredWrite) {
        if let Some(writes) = self.capturing.as_mut() {
            writes.push(write);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.capturing = None;
        self.queued = None;
    }
}

impl Runtime {
    /// Run `update`, deferring every cell write it makes to a low-priority
    /// batch. A transition started inside another joins the outer one.
    pub fn start_transition<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(),
    {
        let inner = self.inner();
        if inner.is_capturing_transition() {
            update();
            return Ok(());
        }

        let already_pending = inner.transitions.borrow().queued.is_some();
        if !already_pending {
            inner.transition_pending.write(true)?;
        }

        inner.transitions.borrow_mut().capturing = Some(Vec::new());
        update();

        let mut state = inner.transitions.borrow_mut();
        let writes = state.capturing.take().unwrap_or_default();
        let seq = state.next_seq;
        state.next_seq += 1;

        let captured = writes.len();
        if let Some(old) = state.queued.replace(TransitionBatch { seq, writes }) {
            debug!(
                tree = %inner.label(),
                superseded = old.seq,
                by = seq,
                dropped = old.writes.len(),
                "transition superseded"
            );
        }
        debug!(tree = %inner.label(), seq, captured, "transition queued");
        Ok(())
    }

    /// Apply the queued transition, if any, and flush.
    ///
    /// The pending flag clears in the same batch as the deferred writes.
    pub fn flush_transitions(&self) -> Result<FlushReport> {
        let batch = self.inner().transitions.borrow_mut().queued.take();
        if let Some(batch) = batch {
            debug!(tree = %self.inner().label(), seq = batch.seq, writes = batch.writes.len(), "applying transition");
            for write in batch.writes {
                write()?;
            }
            self.inner().transition_pending.write(false)?;
        }
        self.flush()
    }

    /// Drop the queued transition without applying it.
    ///
    /// Returns whether one was queued.
    pub fn cancel_transition(&self) -> Result<bool> {
        let batch = self.inner().transitions.borrow_mut().queued.take();
        match batch {
            Some(batch) => {
                debug!(tree = %self.inner().label(), seq = batch.seq, "transition cancelled");
                self.inner().transition_pending.write(false)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether a low-priority batch is waiting.
    pub fn has_pending_transition(&self) -> bool {
        self.inner().transitions.borrow().queued.is_some()
    }

    /// Reactive view of [`has_pending_transition`](Self::has_pending_transition),
    /// as of the last flush.
    pub fn transition_pending(&self) -> CellReader<bool> {
        self.inner().transition_pending.reader()
    }
}
