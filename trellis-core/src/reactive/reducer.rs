//! Reducer-driven state.
//!
//! A [`Reducer`] pairs a state cell with a pure `reduce(&state, action)`
//! function. Dispatching stages `reduce(latest, action)`, where `latest` is
//! the state staged earlier in the same batch if any. Several dispatches in
//! one event therefore compose and commit as a single version bump.

use std::rc::Rc;

use super::cell::{Cell, CellReader};
use super::runtime::Runtime;
use super::source::{Dependency, Source};
use crate::error::Result;
use crate::graph::NodeId;

type ReduceFn<S, A> = Rc<dyn Fn(&S, A) -> S>;

/// State updated only through dispatched actions.
///
/// # Example
///
/// ```rust,ignore
/// enum Action { Increment, Decrement }
///
/// let counter = Reducer::new(&rt, 0, |count: &i32, action| match action {
///     Action::Increment => count + 1,
///     Action::Decrement => count - 1,
/// });
/// counter.dispatch(Action::Increment)?;
/// rt.flush()?;
/// ```
pub struct Reducer<S: 'static, A: 'static> {
    state: Cell<S>,
    reduce: ReduceFn<S, A>,
}

impl<S: 'static, A: 'static> Reducer<S, A> {
    pub fn new<F>(runtime: &Runtime, initial: S, reduce: F) -> Self
    where
        F: Fn(&S, A) -> S + 'static,
    {
        Self {
            state: Cell::new(runtime, initial),
            reduce: Rc::new(reduce),
        }
    }

    pub fn id(&self) -> NodeId {
        self.state.id()
    }

    /// Stage the state produced by `action`.
    pub fn dispatch(&self, action: A) -> Result<()> {
        let reduce = Rc::clone(&self.reduce);
        self.state.update(move |state| reduce(state, action))
    }

    pub fn version(&self) -> u64 {
        self.state.version()
    }

    pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        self.state.with(f)
    }

    /// Read-only view of the state, for components that only render it.
    pub fn reader(&self) -> CellReader<S> {
        self.state.reader()
    }
}

impl<S: Clone + 'static, A: 'static> Reducer<S, A> {
    pub fn state(&self) -> S {
        self.state.read()
    }
}

impl<S: 'static, A: 'static> Clone for Reducer<S, A> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            reduce: Rc::clone(&self.reduce),
        }
    }
}

impl<S: 'static, A: 'static> Dependency for Reducer<S, A> {
    fn source(&self) -> Rc<dyn Source> {
        self.state.source()
    }
}
