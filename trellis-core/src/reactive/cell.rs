//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive: one mutable storage
//! location with a version stamp.
//!
//! # How Cells Work
//!
//! 1. Reading a cell while a derivation computes records the cell as one of
//!    that derivation's inputs.
//!
//! 2. Writing a cell does not change what readers see. The value is staged
//!    and the cell joins the current batch.
//!
//! 3. When the host flushes, every staged value is committed and its cell's
//!    version goes up by exactly one, however many writes the batch held.
//!
//! Because readers only ever see committed values, an equal version always
//! means an equal value.

use std::cell::{Cell as Slot, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::cancel::{CancelToken, GuardedWriter};
use super::context::ReactiveContext;
use super::runtime::{Runtime, RuntimeInner};
use super::source::{Dependency, Source};
use crate::error::{Result, Violation};
use crate::graph::{NodeId, NodeKind};

/// A staged write waiting for the next commit.
pub(crate) trait Commit {
    fn node_id(&self) -> NodeId;

    /// Move the staged value into place. Returns false if nothing was staged.
    fn commit(&self) -> bool;

    /// Drop the staged value without committing it.
    fn discard(&self);
}

pub(crate) struct CellInner<T> {
    id: NodeId,
    value: RefCell<T>,
    staged: RefCell<Option<T>>,
    version: Slot<u64>,
    runtime: Weak<RuntimeInner>,
}

impl<T: 'static> Source for CellInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn current_version(&self) -> Result<u64> {
        Ok(self.version.get())
    }
}

impl<T: 'static> Commit for CellInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn commit(&self) -> bool {
        let Some(value) = self.staged.borrow_mut().take() else {
            return false;
        };
        *self.value.borrow_mut() = value;
        self.version.set(self.version.get() + 1);
        trace!(cell = %self.id, version = self.version.get(), "committed");
        true
    }

    fn discard(&self) {
        self.staged.borrow_mut().take();
    }
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unregister_node(self.id);
        }
    }
}

/// A versioned, batched storage location owned by one component tree.
///
/// Cloning a `Cell` creates another handle to the same storage. The clone
/// is still a writer; hand out [`CellReader`]s to code that should only read.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let count = Cell::new(&rt, 4);
///
/// count.update(|c| c - 1)?;
/// count.update(|c| c - 1)?;
/// assert_eq!(count.read(), 4); // staged, not committed
///
/// rt.flush()?;
/// assert_eq!(count.read(), 2);
/// assert_eq!(count.version(), 1);
/// ```
pub struct Cell<T: 'static> {
    inner: Rc<CellInner<T>>,
}

impl<T: 'static> Cell<T> {
    /// Create a cell in `runtime` holding `value`.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        let cell = Self::detached(runtime.downgrade(), value);
        runtime.inner().register_node(cell.id(), NodeKind::Cell);
        cell
    }

    /// Create a cell whose initial value is produced by `init`.
    ///
    /// `init` runs exactly once, here.
    pub fn new_with<F>(runtime: &Runtime, init: F) -> Self
    where
        F: FnOnce() -> T,
    {
        Self::new(runtime, init())
    }

    /// Build a cell without registering it in the graph. The caller is
    /// responsible for registering the node.
    pub(crate) fn detached(runtime: Weak<RuntimeInner>, value: T) -> Self {
        Self {
            inner: Rc::new(CellInner {
                id: NodeId::new(),
                value: RefCell::new(value),
                staged: RefCell::new(None),
                version: Slot::new(0),
                runtime,
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The committed version. Starts at 0 and goes up by one per commit.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Read the committed value through a reference.
    ///
    /// Tracked like [`read`](Self::read).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        ReactiveContext::track(self.inner.clone());
        f(&self.inner.value.borrow())
    }

    /// Stage `value` for the next commit.
    ///
    /// Later writes in the same batch replace earlier ones.
    pub fn write(&self, value: T) -> Result<()> {
        let runtime = self.writable_runtime()?;
        if runtime.is_capturing_transition() {
            let cell = self.clone();
            runtime.defer(Box::new(move || cell.write(value)));
            return Ok(());
        }
        *self.inner.staged.borrow_mut() = Some(value);
        runtime.enqueue(self.inner.clone());
        Ok(())
    }

    /// Stage `f(latest)`, where `latest` is the value staged earlier in this
    /// batch if there is one, otherwise the committed value.
    ///
    /// Two updates in one batch therefore compose.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T + 'static,
    {
        let runtime = self.writable_runtime()?;
        if runtime.is_capturing_transition() {
            let cell = self.clone();
            runtime.defer(Box::new(move || cell.update(f)));
            return Ok(());
        }
        // No borrow of the staged slot is held while `f` runs.
        let latest = self.inner.staged.borrow_mut().take();
        let next = match latest {
            Some(latest) => f(&latest),
            None => f(&self.inner.value.borrow()),
        };
        *self.inner.staged.borrow_mut() = Some(next);
        runtime.enqueue(self.inner.clone());
        Ok(())
    }

    /// Whether a write to this cell is waiting for the next commit.
    pub fn is_staged(&self) -> bool {
        self.inner.staged.borrow().is_some()
    }

    /// A read-only handle to this cell, for handing to descendants.
    pub fn reader(&self) -> CellReader<T> {
        CellReader {
            inner: self.inner.clone(),
        }
    }

    /// A writer for an async completion that writes only while `token` is live.
    pub fn guarded(&self, token: CancelToken) -> GuardedWriter<T> {
        GuardedWriter::new(self.clone(), token)
    }

    fn writable_runtime(&self) -> Result<Rc<RuntimeInner>> {
        if let Some(derivation) = ReactiveContext::computing_derivation() {
            let violation = Violation::WriteDuringCompute {
                cell: self.inner.id,
                derivation,
            };
            ReactiveContext::record_violation(derivation, violation);
            return Err(violation.into());
        }
        match self.inner.runtime.upgrade() {
            Some(runtime) if runtime.is_mounted() => Ok(runtime),
            _ => Err(Violation::WriteAfterTeardown { cell: self.inner.id }.into()),
        }
    }
}

impl<T: Clone + 'static> Cell<T> {
    /// Get the committed value.
    ///
    /// If called while a derivation computes, the cell becomes one of its
    /// inputs.
    pub fn read(&self) -> T {
        ReactiveContext::track(self.inner.clone());
        self.inner.value.borrow().clone()
    }

    /// Get the committed value without recording a dependency.
    pub fn read_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

impl<T: 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Dependency for Cell<T> {
    fn source(&self) -> Rc<dyn Source> {
        self.inner.clone()
    }
}

impl<T: Debug + 'static> Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .field("staged", &self.is_staged())
            .finish()
    }
}

/// Read-only view of a [`Cell`].
///
/// This is how shared values (a theme, a locale) reach descendants: the
/// owning node keeps the `Cell` and passes readers down when it builds them.
pub struct CellReader<T: 'static> {
    inner: Rc<CellInner<T>>,
}

impl<T: 'static> CellReader<T> {
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        ReactiveContext::track(self.inner.clone());
        f(&self.inner.value.borrow())
    }
}

impl<T: Clone + 'static> CellReader<T> {
    pub fn read(&self) -> T {
        ReactiveContext::track(self.inner.clone());
        self.inner.value.borrow().clone()
    }
}

impl<T: 'static> Clone for CellReader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Dependency for CellReader<T> {
    fn source(&self) -> Rc<dyn Source> {
        self.inner.clone()
    }
}

impl<T: Debug + 'static> Debug for CellReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellReader")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::reactive::context::FrameKind;

    #[test]
    fn write_is_invisible_until_flush() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);

        cell.write(42).unwrap();
        assert_eq!(cell.read(), 0);
        assert!(cell.is_staged());

        rt.flush().unwrap();
        assert_eq!(cell.read(), 42);
        assert_eq!(cell.version(), 1);
        assert!(!cell.is_staged());
    }

    #[test]
    fn writes_in_one_batch_bump_version_once() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);

        cell.write(1).unwrap();
        cell.write(2).unwrap();
        rt.flush().unwrap();

        assert_eq!(cell.read(), 2);
        assert_eq!(cell.version(), 1);
    }

    #[test]
    fn updates_compose_within_a_batch() {
        let rt = Runtime::new();
        let count = Cell::new(&rt, 4);

        count.update(|c| c - 1).unwrap();
        count.update(|c| c - 1).unwrap();
        rt.flush().unwrap();

        assert_eq!(count.read(), 2);
        assert_eq!(count.version(), 1);
    }

    #[test]
    fn updater_may_write_its_own_cell() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let same = cell.clone();

        cell.write(1).unwrap();
        cell.update(move |v| {
            same.write(100).unwrap();
            v + 1
        })
        .unwrap();
        rt.flush().unwrap();

        assert_eq!(cell.read(), 2);
        assert_eq!(cell.version(), 1);
    }

    #[test]
    fn dropped_cells_leave_the_graph() {
        let rt = Runtime::new();
        let baseline = rt.node_count();

        let cells: Vec<Cell<i32>> = (0..10).map(|i| Cell::new(&rt, i)).collect();
        assert_eq!(rt.node_count(), baseline + 10);

        let reader = cells[0].reader();
        drop(cells);
        assert_eq!(rt.node_count(), baseline + 1);

        drop(reader);
        assert_eq!(rt.node_count(), baseline);
    }

    #[test]
    fn new_with_runs_initialiser_once() {
        let rt = Runtime::new();
        let calls = Rc::new(Slot::new(0));
        let calls_clone = calls.clone();

        let cell = Cell::new_with(&rt, move || {
            calls_clone.set(calls_clone.get() + 1);
            4
        });
        cell.write(5).unwrap();
        rt.flush().unwrap();

        assert_eq!(cell.read(), 5);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn clone_shares_storage() {
        let rt = Runtime::new();
        let a = Cell::new(&rt, "x".to_string());
        let b = a.clone();

        a.write("y".to_string()).unwrap();
        rt.flush().unwrap();

        assert_eq!(b.read(), "y");
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn reader_sees_commits() {
        let rt = Runtime::new();
        let dark = Cell::new(&rt, true);
        let reader = dark.reader();

        dark.update(|d| !d).unwrap();
        rt.flush().unwrap();

        assert!(!reader.read());
        assert_eq!(reader.version(), 1);
        assert_eq!(reader.id(), dark.id());
    }

    #[test]
    fn write_inside_derivation_frame_is_refused() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        let derivation = NodeId::new();

        let ctx = ReactiveContext::enter(derivation, FrameKind::Derivation);
        let err = cell.write(1).unwrap_err();
        let record = ctx.exit();

        assert_eq!(
            err,
            ReactiveError::InvariantViolation(Violation::WriteDuringCompute {
                cell: cell.id(),
                derivation,
            })
        );
        assert!(record.violation.is_some());
        assert!(!cell.is_staged());
    }

    #[test]
    fn write_inside_effect_frame_is_allowed() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);

        let ctx = ReactiveContext::enter(NodeId::new(), FrameKind::Effect);
        assert!(cell.write(1).is_ok());
        drop(ctx);
    }

    #[test]
    fn write_after_runtime_dropped_fails() {
        let rt = Runtime::new();
        let cell = Cell::new(&rt, 0);
        drop(rt);

        let err = cell.write(1).unwrap_err();
        assert_eq!(
            err.violation(),
            Some(Violation::WriteAfterTeardown { cell: cell.id() })
        );
    }
}
