//! Reactive Runtime
//!
//! The runtime is the scheduler for one component tree. It owns the
//! dependency graph, the pending batch and the effect table, and drives the
//! `Idle -> Batching -> Flushing -> Idle` cycle.
//!
//! # How It Works
//!
//! 1. A cell write stages the value and adds the cell to the pending batch.
//!    The first write moves the runtime from `Idle` to `Batching`.
//!
//! 2. The host calls [`Runtime::flush`] at the end of each external event.
//!    Each flush pass:
//!    a. Commits every staged write (one version bump per cell)
//!    b. Finds effects reachable from the committed cells whose input
//!       versions changed, plus effects that have never run
//!    c. Runs all their cleanups, then all their actions, in registration order
//!    d. Derivations are lazy - they recompute only when read
//!
//! 3. Writes made by effect actions form the next batch, which is flushed
//!    straight away. A flush that needs more than `max_flush_passes` passes
//!    fails with a runaway-loop violation and drops the offending batch.
//!
//! 4. [`Runtime::unmount`] runs every outstanding cleanup once, in
//!    registration order. After that, writes are refused.
//!
//! # Threading
//!
//! Everything is single-threaded. Handles are `Rc`-based and the runtime is
//! neither `Send` nor `Sync`; async work integrates by writing a cell from
//! the same thread when it completes.

use std::cell::{Cell as Slot, RefCell};
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, error, trace, warn};

use super::cell::{Cell, Commit};
use super::context::ReactiveContext;
use super::effect::EffectInner;
use super::source::InputVersions;
use super::transition::TransitionState;
use crate::config::{ConfigError, RuntimeConfig};
use crate::error::{ReactiveError, Result, Violation};
use crate::graph::{DependencyGraph, NodeId, NodeKind};

/// A write captured while a transition was being started.
pub(crate) type DeferredWrite = Box<dyn FnOnce() -> Result<()>>;

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No pending writes.
    Idle,
    /// Writes are staged and waiting for a flush.
    Batching,
    /// A flush is committing writes and running effects.
    Flushing,
    /// The tree was torn down. Terminal.
    Unmounted,
}

/// What a flush (or an unmount) did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Effect passes taken.
    pub passes: usize,
    /// Cells committed across all passes.
    pub commits: usize,
    /// Effect actions run.
    pub effects_run: usize,
    /// Cleanups run, including failed ones.
    pub cleanups_run: usize,
    /// Cleanup failures. Logged and swallowed, collected here for the host.
    pub cleanup_errors: Vec<ReactiveError>,
}

impl FlushReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: FlushReport) {
        self.passes += other.passes;
        self.commits += other.commits;
        self.effects_run += other.effects_run;
        self.cleanups_run += other.cleanups_run;
        self.cleanup_errors.extend(other.cleanup_errors);
    }
}

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    phase: Slot<Phase>,
    graph: RefCell<DependencyGraph>,

    /// Cells written since the last commit, in first-write order.
    pending: RefCell<IndexMap<NodeId, Rc<dyn Commit>>>,

    /// Live effects, in registration order.
    effects: RefCell<IndexMap<NodeId, Rc<EffectInner>>>,

    /// Effects and derivations with an input from outside this tree's graph.
    /// The graph cannot tell when those change, so everything downstream of
    /// them is checked on every pass.
    unlinked: RefCell<IndexSet<NodeId>>,

    pub(crate) transitions: RefCell<TransitionState>,
    pub(crate) transition_pending: Cell<bool>,
}

impl RuntimeInner {
    pub(crate) fn label(&self) -> &str {
        &self.config.label
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.phase.get() != Phase::Unmounted
    }

    pub(crate) fn register_node(&self, id: NodeId, kind: NodeKind) {
        self.graph.borrow_mut().add_node(id, kind);
    }

    /// Drop a node whose last handle went away.
    ///
    /// Called from `Drop`, so a graph that is already borrowed is left alone.
    pub(crate) fn unregister_node(&self, id: NodeId) {
        if let Ok(mut graph) = self.graph.try_borrow_mut() {
            graph.remove_node(id);
        }
        if let Ok(mut unlinked) = self.unlinked.try_borrow_mut() {
            unlinked.shift_remove(&id);
        }
    }

    fn mark_linked(&self, id: NodeId, linked: bool) {
        let mut unlinked = self.unlinked.borrow_mut();
        if linked {
            unlinked.shift_remove(&id);
        } else if unlinked.insert(id) {
            trace!(tree = %self.config.label, node = %id, "node has inputs from another tree");
        }
    }

    /// Add edges from each input to a freshly registered node.
    pub(crate) fn link_inputs<I>(&self, id: NodeId, inputs: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut linked = true;
        {
            let mut graph = self.graph.borrow_mut();
            for input in inputs {
                if !graph.contains(input) {
                    linked = false;
                    continue;
                }
                if let Err(violation) = graph.add_edge(input, id) {
                    warn!(tree = %self.config.label, node = %id, %violation, "input edge refused");
                }
            }
        }
        self.mark_linked(id, linked);
    }

    /// Replace a derivation's edges after it recomputed.
    pub(crate) fn set_dependencies<I>(&self, id: NodeId, inputs: I) -> Result<()>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let inputs: Vec<NodeId> = inputs.into_iter().collect();
        let linked = {
            let mut graph = self.graph.borrow_mut();
            graph.replace_dependencies(id, inputs.iter().copied())?;
            inputs.iter().all(|input| graph.contains(*input))
        };
        self.mark_linked(id, linked);
        Ok(())
    }

    pub(crate) fn register_effect(&self, effect: Rc<EffectInner>) {
        let id = effect.id();
        if !self.is_mounted() {
            debug!(tree = %self.config.label, effect = %id, "effect registered after unmount; disposed");
            effect.dispose(&mut Vec::new());
            return;
        }

        let inputs: Vec<NodeId> = effect.inputs().iter().map(|s| s.node_id()).collect();
        self.graph.borrow_mut().add_node(id, NodeKind::Effect);
        self.link_inputs(id, inputs);
        self.effects.borrow_mut().insert(id, effect);
        trace!(tree = %self.config.label, effect = %id, "effect registered");
    }

    pub(crate) fn unregister_effect(&self, id: NodeId) {
        self.effects.borrow_mut().shift_remove(&id);
        self.unlinked.borrow_mut().shift_remove(&id);
        self.graph.borrow_mut().remove_node(id);
    }

    pub(crate) fn is_capturing_transition(&self) -> bool {
        self.transitions.borrow().is_capturing()
    }

    pub(crate) fn defer(&self, write: DeferredWrite) {
        self.transitions.borrow_mut().capture(write);
    }

    /// Add a staged cell to the pending batch.
    pub(crate) fn enqueue(&self, cell: Rc<dyn Commit>) {
        let id = cell.node_id();
        self.pending.borrow_mut().insert(id, cell);
        if self.phase.get() == Phase::Idle {
            self.phase.set(Phase::Batching);
            trace!(tree = %self.config.label, "batch opened");
        }
    }

    fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    fn has_unrun_effects(&self) -> bool {
        self.effects
            .borrow()
            .values()
            .any(|e| !e.is_disposed() && !e.has_run())
    }

    /// Commit every staged write. Returns the cells whose versions moved.
    fn commit_pending(&self) -> Vec<NodeId> {
        let batch = mem::take(&mut *self.pending.borrow_mut());
        batch
            .into_values()
            .filter(|cell| cell.commit())
            .map(|cell| cell.node_id())
            .collect()
    }

    fn discard_pending(&self) {
        let batch = mem::take(&mut *self.pending.borrow_mut());
        if !batch.is_empty() {
            debug!(tree = %self.config.label, dropped = batch.len(), "pending batch discarded");
        }
        for cell in batch.into_values() {
            cell.discard();
        }
    }

    /// Effects due in this pass, with the version vectors they will record.
    fn collect_due(&self, committed: &[NodeId]) -> Result<Vec<(Rc<EffectInner>, InputVersions)>> {
        let unlinked = self.unlinked.borrow().clone();
        let affected = self
            .graph
            .borrow()
            .affected_by(committed.iter().chain(unlinked.iter()).copied());
        let effects: Vec<Rc<EffectInner>> = self.effects.borrow().values().cloned().collect();

        let mut due = Vec::new();
        for effect in effects {
            if effect.is_disposed() {
                continue;
            }
            let id = effect.id();
            if effect.has_run() && !affected.contains(&id) && !unlinked.contains(&id) {
                continue;
            }
            if let Some(versions) = effect.due_versions()? {
                due.push((effect, versions));
            }
        }
        Ok(due)
    }

    fn run_effect_pass(
        &self,
        due: Vec<(Rc<EffectInner>, InputVersions)>,
        report: &mut FlushReport,
    ) -> Result<()> {
        for (effect, _) in &due {
            if effect.run_cleanup(&mut report.cleanup_errors) {
                report.cleanups_run += 1;
            }
        }
        for (effect, versions) in due {
            if effect.is_disposed() {
                continue;
            }
            if effect.run_action(versions, &mut report.cleanup_errors)? {
                report.cleanups_run += 1;
            }
            report.effects_run += 1;
        }
        Ok(())
    }

    fn run_passes(&self, report: &mut FlushReport) -> Result<()> {
        loop {
            if !self.has_pending() && !self.has_unrun_effects() {
                return Ok(());
            }
            if report.passes >= self.config.max_flush_passes {
                error!(
                    tree = %self.config.label,
                    passes = report.passes,
                    "possible infinite update loop"
                );
                return Err(Violation::RunawayUpdateLoop {
                    passes: report.passes,
                }
                .into());
            }
            report.passes += 1;

            let committed = self.commit_pending();
            report.commits += committed.len();

            let due = self.collect_due(&committed)?;
            trace!(
                tree = %self.config.label,
                pass = report.passes,
                committed = committed.len(),
                due = due.len(),
                "flush pass"
            );
            self.run_effect_pass(due, report)?;
        }
    }

    fn flush(&self) -> Result<FlushReport> {
        match self.phase.get() {
            Phase::Unmounted => return Ok(FlushReport::default()),
            Phase::Flushing => return Err(Violation::ReentrantScheduler.into()),
            Phase::Idle | Phase::Batching => {}
        }
        if ReactiveContext::computing_derivation().is_some() {
            return Err(Violation::ReentrantScheduler.into());
        }

        self.phase.set(Phase::Flushing);
        let mut report = FlushReport::default();
        let result = self.run_passes(&mut report);
        if result.is_err() {
            self.discard_pending();
        }
        if self.phase.get() == Phase::Flushing {
            self.phase.set(Phase::Idle);
        }

        match result {
            Ok(()) => {
                if report.passes > 0 {
                    debug!(
                        tree = %self.config.label,
                        passes = report.passes,
                        commits = report.commits,
                        effects_run = report.effects_run,
                        cleanup_errors = report.cleanup_errors.len(),
                        "flush complete"
                    );
                }
                Ok(report)
            }
            Err(err) => {
                debug!(tree = %self.config.label, error = %err, "flush failed");
                Err(err)
            }
        }
    }

    fn teardown(&self) -> FlushReport {
        self.phase.set(Phase::Unmounted);
        self.discard_pending();
        self.transitions.borrow_mut().clear();

        let effects = mem::take(&mut *self.effects.borrow_mut());
        let mut report = FlushReport::default();
        for effect in effects.into_values() {
            if effect.dispose(&mut report.cleanup_errors) {
                report.cleanups_run += 1;
            }
        }
        self.unlinked.borrow_mut().clear();
        *self.graph.borrow_mut() = DependencyGraph::new();

        debug!(
            tree = %self.config.label,
            cleanups_run = report.cleanups_run,
            cleanup_errors = report.cleanup_errors.len(),
            "unmounted"
        );
        report
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        if self.is_mounted() {
            self.teardown();
        }
    }
}

/// Handle to the scheduler of one component tree.
///
/// Cloning a `Runtime` creates another handle to the same tree. The tree is
/// torn down by [`unmount`](Self::unmount), or when the last handle is
/// dropped.
///
/// # Example
///
/// ```rust,ignore
/// let rt = Runtime::new();
/// let n = Cell::new(&rt, 0);
///
/// n.write(1)?;
/// n.write(2)?;
/// rt.flush()?; // one commit, one effect pass
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Mount a tree with the default config.
    pub fn new() -> Self {
        Self::mount(RuntimeConfig::default())
    }

    /// Mount a tree with `config`, after validating it.
    pub fn with_config(config: RuntimeConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::mount(config))
    }

    fn mount(config: RuntimeConfig) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<RuntimeInner>| {
            let transition_pending = Cell::detached(weak.clone(), false);
            let mut graph = DependencyGraph::new();
            graph.add_node(transition_pending.id(), NodeKind::Cell);
            RuntimeInner {
                config,
                phase: Slot::new(Phase::Idle),
                graph: RefCell::new(graph),
                pending: RefCell::new(IndexMap::new()),
                effects: RefCell::new(IndexMap::new()),
                unlinked: RefCell::new(IndexSet::new()),
                transitions: RefCell::new(TransitionState::default()),
                transition_pending,
            }
        });
        debug!(tree = %inner.config.label, "mounted");
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<RuntimeInner> {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase.get()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.is_mounted()
    }

    /// Whether any write is waiting for a flush.
    pub fn has_pending_writes(&self) -> bool {
        self.inner.has_pending()
    }

    /// Number of live (registered, not disposed) effects.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }

    /// Number of nodes in the dependency graph.
    pub fn node_count(&self) -> usize {
        self.inner.graph.borrow().node_count()
    }

    /// Commit the pending batch and run due effects until nothing is dirty.
    ///
    /// Must not be called from inside an effect action or a derivation.
    pub fn flush(&self) -> Result<FlushReport> {
        self.inner.flush()
    }

    /// Run `event` as one batch, then flush.
    pub fn batch<F>(&self, event: F) -> Result<FlushReport>
    where
        F: FnOnce() -> Result<()>,
    {
        event()?;
        self.flush()
    }

    /// Tear the tree down: drop pending writes and transitions, and run every
    /// outstanding effect cleanup once, in registration order.
    ///
    /// Unmounting twice is a no-op.
    pub fn unmount(&self) -> Result<FlushReport> {
        match self.inner.phase.get() {
            Phase::Unmounted => Ok(FlushReport::default()),
            Phase::Flushing => Err(Violation::ReentrantScheduler.into()),
            Phase::Idle | Phase::Batching => {
                if ReactiveContext::computing_derivation().is_some() {
                    return Err(Violation::ReentrantScheduler.into());
                }
                Ok(self.inner.teardown())
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("label", &self.inner.config.label)
            .field("phase", &self.phase())
            .field("pending", &self.inner.pending.borrow().len())
            .field("effects", &self.effect_count())
            .finish()
    }
}
