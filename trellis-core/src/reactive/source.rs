//! Dependency sources.
//!
//! Anything a derivation or effect can depend on exposes a [`Source`]: a
//! stable node identity plus a version that changes exactly when the value
//! does. Version vectors built from sources decide whether a derivation is
//! stale and whether an effect is due.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::Result;
use crate::graph::NodeId;

/// Versions of a node's inputs, in input order.
pub type InputVersions = SmallVec<[u64; 4]>;

/// A versioned input in the reactive graph.
pub trait Source {
    /// Identity of the node in its tree's dependency graph.
    fn node_id(&self) -> NodeId;

    /// The current version. Derivations bring themselves up to date first,
    /// which may run their compute.
    fn current_version(&self) -> Result<u64>;
}

/// A handle that can be listed as an input of a derivation or effect.
pub trait Dependency {
    fn source(&self) -> Rc<dyn Source>;
}

pub(crate) fn collect_sources(inputs: &[&dyn Dependency]) -> Vec<Rc<dyn Source>> {
    let mut sources: Vec<Rc<dyn Source>> = Vec::with_capacity(inputs.len());
    for input in inputs {
        let source = input.source();
        if !sources.iter().any(|s| s.node_id() == source.node_id()) {
            sources.push(source);
        }
    }
    sources
}

pub(crate) fn versions_of(sources: &[Rc<dyn Source>]) -> Result<InputVersions> {
    sources.iter().map(|s| s.current_version()).collect()
}
