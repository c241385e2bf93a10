//! Error Types
//!
//! Every fallible operation in the crate returns [`ReactiveError`]. The
//! variants follow the failure model of a render/commit cycle:
//!
//! - [`ReactiveError::InvariantViolation`] is fatal to the batch that caused
//!   it and is always surfaced to the host.
//! - [`ReactiveError::EffectCleanup`] is logged and collected, but never
//!   aborts the rest of an effect pass.
//! - [`ReactiveError::Callback`] carries a failure raised by user code
//!   (a compute, an action, or a cleanup).

use thiserror::Error;

use crate::graph::NodeId;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// The specific invariant that was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
    /// A cell was written while a derivation was computing.
    #[error("cell {cell} written while derivation {derivation} was computing")]
    WriteDuringCompute { cell: NodeId, derivation: NodeId },

    /// A cell was written after its tree was torn down.
    #[error("cell {cell} written after the tree was unmounted")]
    WriteAfterTeardown { cell: NodeId },

    /// Effect passes kept producing new writes.
    #[error("possible infinite update loop: still dirty after {passes} flush passes")]
    RunawayUpdateLoop { passes: usize },

    /// A derivation ended up depending on itself.
    #[error("dependency cycle through node {node}")]
    DependencyCycle { node: NodeId },

    /// `flush` or `unmount` was called from inside a running flush.
    #[error("scheduler re-entered while flushing")]
    ReentrantScheduler,
}

/// Errors produced by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    #[error("invariant violation: {0}")]
    InvariantViolation(#[from] Violation),

    #[error("cleanup of effect {effect} failed: {message}")]
    EffectCleanup { effect: NodeId, message: String },

    #[error("{0}")]
    Callback(String),
}

impl ReactiveError {
    /// Build an error from a failing compute, action or cleanup.
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback(message.into())
    }

    /// Whether this error is an invariant violation.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }

    /// The violated invariant, if any.
    pub fn violation(&self) -> Option<Violation> {
        match self {
            Self::InvariantViolation(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_converts_into_error() {
        let err: ReactiveError = Violation::RunawayUpdateLoop { passes: 25 }.into();
        assert!(err.is_invariant_violation());
        assert_eq!(err.violation(), Some(Violation::RunawayUpdateLoop { passes: 25 }));
        assert_eq!(
            err.to_string(),
            "invariant violation: possible infinite update loop: still dirty after 25 flush passes"
        );
    }

    #[test]
    fn callback_errors_are_not_violations() {
        let err = ReactiveError::callback("fetch failed");
        assert!(!err.is_invariant_violation());
        assert_eq!(err.violation(), None);
        assert_eq!(err.to_string(), "fetch failed");
    }
}
