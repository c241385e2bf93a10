//! Derivation Implementation
//!
//! A Derivation is a cached derived value that re-evaluates only when its
//! inputs change.
//!
//! # How Derivations Work
//!
//! 1. On first access, the derivation runs its compute and caches the result
//!    together with the version of every input it read.
//!
//! 2. On later accesses, it re-reads the versions of those inputs. If they
//!    all match, the cached value is returned without running compute.
//!
//! 3. If any version differs, compute runs again and every input is re-read
//!    in that single pass. There is no partial recomputation.
//!
//! Inputs are the union of the declared input list and every cell or
//! derivation read during the last compute.
//!
//! # Why This Matters
//!
//! Nothing is pushed into a derivation when a cell changes. A derivation
//! that is never read after a write never recomputes.
//!
//! # Purity
//!
//! A compute must not write to a cell. A write attempt is refused and the
//! derivation's `get` fails with an invariant violation.

use std::cell::{Cell as Slot, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::context::{FrameKind, ReactiveContext};
use super::runtime::{Runtime, RuntimeInner};
use super::source::{collect_sources, versions_of, Dependency, InputVersions, Source};
use crate::error::{Result, Violation};
use crate::graph::{NodeId, NodeKind};

type ComputeFn<T> = Box<dyn Fn() -> Result<T>>;

struct Cache<T> {
    value: T,
    inputs: Vec<Rc<dyn Source>>,
    input_versions: InputVersions,
}

struct DerivationInner<T> {
    id: NodeId,
    compute: ComputeFn<T>,
    declared: Vec<Rc<dyn Source>>,
    cache: RefCell<Option<Cache<T>>>,

    /// Bumped on every recomputation.
    version: Slot<u64>,
    recompute_count: Slot<usize>,
    runtime: Weak<RuntimeInner>,
}

impl<T: Clone + 'static> DerivationInner<T> {
    /// Whether the cache exists and every input still has its recorded version.
    fn is_fresh(&self) -> Result<bool> {
        let recorded = {
            let cache = self.cache.borrow();
            match cache.as_ref() {
                Some(cache) => (cache.inputs.clone(), cache.input_versions.clone()),
                None => return Ok(false),
            }
        };
        let (inputs, versions) = recorded;
        Ok(versions_of(&inputs)? == versions)
    }

    fn cached(&self) -> Option<T> {
        self.cache.borrow().as_ref().map(|c| c.value.clone())
    }

    fn refresh(&self) -> Result<T> {
        if ReactiveContext::is_evaluating(self.id) {
            let violation = Violation::DependencyCycle { node: self.id };
            ReactiveContext::record_violation(self.id, violation);
            return Err(violation.into());
        }
        if self.is_fresh()? {
            if let Some(value) = self.cached() {
                return Ok(value);
            }
        }
        self.recompute()
    }

    fn recompute(&self) -> Result<T> {
        // Declared inputs first, so nested derivations are current before
        // compute reads them.
        let declared_versions = versions_of(&self.declared)?;

        let ctx = ReactiveContext::enter(self.id, FrameKind::Derivation);
        let result = (self.compute)();
        let record = ctx.exit();

        if let Some(violation) = record.violation {
            return Err(violation.into());
        }
        let value = result?;

        let mut inputs = self.declared.clone();
        let mut input_versions = declared_versions;
        for source in record.tracked {
            if inputs.iter().any(|s| s.node_id() == source.node_id()) {
                continue;
            }
            input_versions.push(source.current_version()?);
            inputs.push(source);
        }

        if let Some(runtime) = self.runtime.upgrade() {
            runtime.set_dependencies(self.id, inputs.iter().map(|s| s.node_id()))?;
        }

        self.version.set(self.version.get() + 1);
        self.recompute_count.set(self.recompute_count.get() + 1);
        trace!(derivation = %self.id, version = self.version.get(), inputs = inputs.len(), "recomputed");

        *self.cache.borrow_mut() = Some(Cache {
            value: value.clone(),
            inputs,
            input_versions,
        });
        Ok(value)
    }
}

impl<T> Drop for DerivationInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.unregister_node(self.id);
        }
    }
}

impl<T: Clone + 'static> Source for DerivationInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn current_version(&self) -> Result<u64> {
        self.refresh()?;
        Ok(self.version.get())
    }
}

/// A cached pure computation over cells and other derivations.
///
/// # Example
///
/// ```rust,ignore
/// let number = Cell::new(&rt, 0);
/// let dark = Cell::new(&rt, false);
///
/// let n = number.clone();
/// let doubled = Derivation::new(&rt, &[&number], move || slow_double(n.read()));
///
/// doubled.get()?;            // computes
/// dark.write(true)?;
/// rt.flush()?;
/// doubled.get()?;            // cached: `dark` is not an input
/// ```
pub struct Derivation<T: Clone + 'static> {
    inner: Rc<DerivationInner<T>>,
}

impl<T: Clone + 'static> Derivation<T> {
    /// Create a derivation over `inputs`. Compute runs on first `get`.
    pub fn new<F>(runtime: &Runtime, inputs: &[&dyn Dependency], compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::try_new(runtime, inputs, move || Ok(compute()))
    }

    /// Create a derivation whose compute can fail.
    ///
    /// A compute error is returned from `get` and nothing is cached.
    pub fn try_new<F>(runtime: &Runtime, inputs: &[&dyn Dependency], compute: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        let declared = collect_sources(inputs);
        let inner = Rc::new(DerivationInner {
            id: NodeId::new(),
            compute: Box::new(compute),
            declared,
            cache: RefCell::new(None),
            version: Slot::new(0),
            recompute_count: Slot::new(0),
            runtime: runtime.downgrade(),
        });
        runtime.inner().register_node(inner.id, NodeKind::Derivation);
        runtime
            .inner()
            .link_inputs(inner.id, inner.declared.iter().map(|s| s.node_id()));
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the value, recomputing first if any input changed.
    ///
    /// Called inside another derivation's compute, this derivation becomes
    /// one of its inputs.
    pub fn get(&self) -> Result<T> {
        ReactiveContext::track(self.inner.clone());
        self.inner.refresh()
    }

    /// The number of times compute has run to completion.
    pub fn recompute_count(&self) -> usize {
        self.inner.recompute_count.get()
    }

    /// The output version, bumped once per recomputation.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    pub fn has_value(&self) -> bool {
        self.inner.cache.borrow().is_some()
    }

    /// Number of inputs recorded by the last compute.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .cache
            .borrow()
            .as_ref()
            .map_or(self.inner.declared.len(), |c| c.inputs.len())
    }
}

impl<T: Clone + 'static> Clone for Derivation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Dependency for Derivation<T> {
    fn source(&self) -> Rc<dyn Source> {
        self.inner.clone()
    }
}

impl<T: Clone + Debug + 'static> Debug for Derivation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derivation")
            .field("id", &self.inner.id)
            .field("cached", &self.inner.cached())
            .field("version", &self.inner.version.get())
            .field("recompute_count", &self.recompute_count())
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
    use crate::reactive::Cell;

    #[test]
    fn derivation_computes_on_first_access() {
        let rt = Runtime::new();
        let derivation = Derivation::new(&rt, &[], || 42);

        assert!(!derivation.has_value());
        assert_eq!(derivation.recompute_count(), 0);

        assert_eq!(derivation.get().unwrap(), 42);
        assert_eq!(derivation.recompute_count(), 1);
        assert!(derivation.has_value());
    }

    #[test]
    fn derivation_caches_value_when_inputs_unchanged() {
        let rt = Runtime::new();
        let number = Cell::new(&rt, 3);
        let n = number.clone();
        let doubled = Derivation::new(&rt, &[&number], move || n.read() * 2);

        assert_eq!(doubled.get().unwrap(), 6);
        assert_eq!(doubled.get().unwrap(), 6);
        assert_eq!(doubled.get().unwrap(), 6);
        assert_eq!(doubled.recompute_count(), 1);
    }

    #[test]
    fn unrelated_write_does_not_recompute() {
        let rt = Runtime::new();
        let number = Cell::new(&rt, 3);
        let dark = Cell::new(&rt, false);
        let n = number.clone();
        let doubled = Derivation::new(&rt, &[&number], move || n.read() * 2);

        doubled.get().unwrap();
        dark.write(true).unwrap();
        rt.flush().unwrap();

        assert_eq!(doubled.get().unwrap(), 6);
        assert_eq!(doubled.recompute_count(), 1);
    }

    #[test]
    fn input_write_recomputes_exactly_once() {
        let rt = Runtime::new();
        let number = Cell::new(&rt, 3);
        let n = number.clone();
        let doubled = Derivation::new(&rt, &[&number], move || n.read() * 2);

        doubled.get().unwrap();
        number.write(5).unwrap();
        rt.flush().unwrap();

        assert_eq!(doubled.get().unwrap(), 10);
        assert_eq!(doubled.get().unwrap(), 10);
        assert_eq!(doubled.recompute_count(), 2);
        assert_eq!(doubled.version(), 2);
    }

    #[test]
    fn undeclared_reads_are_tracked() {
        let rt = Runtime::new();
        let number = Cell::new(&rt, 1);
        let n = number.clone();
        let derivation = Derivation::new(&rt, &[], move || n.read() + 1);

        assert_eq!(derivation.get().unwrap(), 2);
        assert_eq!(derivation.dependency_count(), 1);

        number.write(10).unwrap();
        rt.flush().unwrap();
        assert_eq!(derivation.get().unwrap(), 11);
        assert_eq!(derivation.recompute_count(), 2);
    }

    #[test]
    fn derivation_depends_on_derivation() {
        let rt = Runtime::new();
        let base = Cell::new(&rt, 5);

        let b = base.clone();
        let doubled = Derivation::new(&rt, &[&base], move || b.read() * 2);

        let d = doubled.clone();
        let plus_ten = Derivation::try_new(&rt, &[&doubled], move || Ok(d.get()? + 10));

        assert_eq!(plus_ten.get().unwrap(), 20);

        base.write(10).unwrap();
        rt.flush().unwrap();

        assert_eq!(plus_ten.get().unwrap(), 30);
        assert_eq!(doubled.recompute_count(), 2);
        assert_eq!(plus_ten.recompute_count(), 2);
    }

    #[test]
    fn write_inside_compute_fails_get() {
        let rt = Runtime::new();
        let target = Cell::new(&rt, 0);
        let t = target.clone();
        let impure = Derivation::new(&rt, &[], move || {
            // The error is swallowed here but still fails the derivation.
            let _ = t.write(1);
            0
        });

        let err = impure.get().unwrap_err();
        assert!(matches!(
            err.violation(),
            Some(Violation::WriteDuringCompute { .. })
        ));
        assert!(!impure.has_value());
        assert!(!rt.has_pending_writes());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let rt = Runtime::new();
        let slot: Rc<RefCell<Option<Derivation<i32>>>> = Rc::new(RefCell::new(None));
        let slot_clone = slot.clone();
        let looped = Derivation::try_new(&rt, &[], move || {
            let me = slot_clone.borrow().clone();
            match me {
                Some(me) => me.get(),
                None => Ok(0),
            }
        });
        *slot.borrow_mut() = Some(looped.clone());

        let err = looped.get().unwrap_err();
        assert_eq!(
            err.violation(),
            Some(Violation::DependencyCycle { node: looped.id() })
        );
    }

    #[test]
    fn compute_error_propagates_and_caches_nothing() {
        let rt = Runtime::new();
        let failing: Derivation<i32> =
            Derivation::try_new(&rt, &[], || Err(ReactiveError::callback("boom")));

        assert_eq!(failing.get().unwrap_err(), ReactiveError::callback("boom"));
        assert!(!failing.has_value());
    }

    #[test]
    fn dropped_derivations_leave_the_graph() {
        let rt = Runtime::new();
        let baseline = rt.node_count();

        for i in 0..1000 {
            let cell = Cell::new(&rt, i);
            let c = cell.clone();
            let doubled = Derivation::new(&rt, &[&cell], move || c.read() * 2);
            assert_eq!(doubled.get().unwrap(), i * 2);
        }

        assert_eq!(rt.node_count(), baseline);
    }

    #[test]
    fn derivation_clone_shares_cache() {
        let rt = Runtime::new();
        let first = Derivation::new(&rt, &[], || 42);
        first.get().unwrap();

        let second = first.clone();
        assert_eq!(first.id(), second.id());
        assert!(second.has_value());
        assert_eq!(second.get().unwrap(), 42);
        assert_eq!(first.recompute_count(), 1);
    }
}
