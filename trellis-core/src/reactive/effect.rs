//! Effect Implementation
//!
//! An Effect is a side-effecting action that runs after its inputs change.
//!
//! # How Effects Work
//!
//! 1. An effect is registered with an explicit input list. Reads inside the
//!    action are not tracked.
//!
//! 2. It runs on the first flush after registration.
//!
//! 3. After every later commit, its input version vector is compared with the
//!    one recorded at its last run. If they differ, it is due.
//!
//! 4. In each pass, the cleanups of all due effects run first, in
//!    registration order. Only then do the actions run, in the same order.
//!
//! An empty input list means "run once". Such an effect keeps its cleanup
//! until the tree unmounts or the effect is disposed.
//!
//! # Cleanup
//!
//! An action may return a [`Cleanup`]. At most one is outstanding per effect.
//! It runs before the next action and on teardown. A failing cleanup is
//! logged and reported but never stops the pass.

use std::cell::{Cell as Slot, RefCell};
use std::rc::{Rc, Weak};

use tracing::warn;

use super::context::{FrameKind, ReactiveContext};
use super::runtime::{Runtime, RuntimeInner};
use super::source::{collect_sources, versions_of, Dependency, InputVersions, Source};
use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;

type ActionFn = Box<dyn FnMut() -> Result<Option<Cleanup>>>;

/// Teardown returned by an effect action.
pub struct Cleanup(Box<dyn FnOnce() -> Result<()>>);

impl Cleanup {
    pub fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self(Box::new(move || {
            cleanup();
            Ok(())
        }))
    }

    /// A cleanup that can fail. Failures are reported, not propagated.
    pub fn try_new<F>(cleanup: F) -> Self
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        Self(Box::new(cleanup))
    }

    fn run(self, effect: NodeId) -> Result<()> {
        (self.0)().map_err(|err| ReactiveError::EffectCleanup {
            effect,
            message: err.to_string(),
        })
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cleanup(..)")
    }
}

pub(crate) struct EffectInner {
    id: NodeId,
    inputs: Vec<Rc<dyn Source>>,
    action: RefCell<ActionFn>,
    cleanup: RefCell<Option<Cleanup>>,
    last_versions: RefCell<Option<InputVersions>>,
    disposed: Slot<bool>,
    run_count: Slot<usize>,
    runtime: Weak<RuntimeInner>,
}

impl EffectInner {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn inputs(&self) -> &[Rc<dyn Source>] {
        &self.inputs
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub(crate) fn has_run(&self) -> bool {
        self.last_versions.borrow().is_some()
    }

    /// `Some(current versions)` if the effect should run in this pass.
    pub(crate) fn due_versions(&self) -> Result<Option<InputVersions>> {
        let current = versions_of(&self.inputs)?;
        let due = match self.last_versions.borrow().as_ref() {
            None => true,
            Some(last) => *last != current,
        };
        Ok(due.then_some(current))
    }

    /// Run the outstanding cleanup, if any. Returns whether one ran.
    pub(crate) fn run_cleanup(&self, errors: &mut Vec<ReactiveError>) -> bool {
        let Some(cleanup) = self.cleanup.borrow_mut().take() else {
            return false;
        };
        if let Err(err) = cleanup.run(self.id) {
            warn!(effect = %self.id, error = %err, "effect cleanup failed");
            errors.push(err);
        }
        true
    }

    /// Run the action and record `versions` as its last-run vector.
    ///
    /// An action that disposed its own effect has its cleanup run straight
    /// away, since nothing will be left to run it later. Returns whether that
    /// happened.
    pub(crate) fn run_action(
        &self,
        versions: InputVersions,
        errors: &mut Vec<ReactiveError>,
    ) -> Result<bool> {
        let ctx = ReactiveContext::enter(self.id, FrameKind::Effect);
        let outcome = {
            let mut action = self.action.borrow_mut();
            (&mut **action)()
        };
        drop(ctx);

        let cleanup = outcome?;
        *self.cleanup.borrow_mut() = cleanup;
        *self.last_versions.borrow_mut() = Some(versions);
        self.run_count.set(self.run_count.get() + 1);

        if self.is_disposed() {
            return Ok(self.run_cleanup(errors));
        }
        Ok(false)
    }

    /// Mark disposed and run the outstanding cleanup.
    pub(crate) fn dispose(&self, errors: &mut Vec<ReactiveError>) -> bool {
        self.disposed.set(true);
        self.run_cleanup(errors)
    }
}

/// A side-effecting action re-run when its inputs change.
///
/// The runtime keeps the effect alive; this handle is only for inspection
/// and disposal. Dropping it does not unregister the effect.
///
/// # Example
///
/// ```rust,ignore
/// let width = Cell::new(&rt, 800);
///
/// Effect::new(&rt, &[], move || {
///     let listener = window.on_resize(width.clone());
///     Some(Cleanup::new(move || listener.remove()))
/// });
/// ```
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Register an effect over `inputs`. It first runs on the next flush.
    pub fn new<F>(runtime: &Runtime, inputs: &[&dyn Dependency], mut action: F) -> Self
    where
        F: FnMut() -> Option<Cleanup> + 'static,
    {
        Self::try_new(runtime, inputs, move || Ok(action()))
    }

    /// Register an effect whose action can fail.
    ///
    /// An action error aborts the flush and is returned to the host.
    pub fn try_new<F>(runtime: &Runtime, inputs: &[&dyn Dependency], action: F) -> Self
    where
        F: FnMut() -> Result<Option<Cleanup>> + 'static,
    {
        let inner = Rc::new(EffectInner {
            id: NodeId::new(),
            inputs: collect_sources(inputs),
            action: RefCell::new(Box::new(action)),
            cleanup: RefCell::new(None),
            last_versions: RefCell::new(None),
            disposed: Slot::new(false),
            run_count: Slot::new(0),
            runtime: runtime.downgrade(),
        });
        runtime.inner().register_effect(inner.clone());
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Number of completed action runs.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.inputs.len()
    }

    /// Unregister the effect and run its outstanding cleanup once.
    ///
    /// A failing cleanup is logged and returned. Disposing twice is a no-op.
    pub fn dispose(&self) -> Result<()> {
        if self.inner.is_disposed() {
            return Ok(());
        }
        let mut errors = Vec::new();
        self.inner.dispose(&mut errors);
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.unregister_effect(self.inner.id);
        }
        match errors.pop() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
