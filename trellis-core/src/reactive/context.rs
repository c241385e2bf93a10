//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This serves two purposes:
//!
//! - Dependency tracking: when a cell is read while a derivation computes,
//!   the cell is recorded as one of that derivation's inputs.
//! - Purity enforcement: a cell write while a derivation computes is refused
//!   and the violation is pinned on the derivation's frame, so the derivation
//!   fails even if its compute swallows the error.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Running a derivation or an effect
//! pushes a frame; the returned guard pops it. Nested frames come from a
//! derivation reading another derivation, or an effect reading a derivation.

use std::cell::RefCell;
use std::rc::Rc;

use super::source::Source;
use crate::error::Violation;
use crate::graph::NodeId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// What kind of computation a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A derivation compute. Reads are tracked, writes are refused.
    Derivation,
    /// An effect action. Reads are not tracked, writes are allowed.
    Effect,
}

struct Frame {
    node: NodeId,
    kind: FrameKind,
    tracked: Vec<Rc<dyn Source>>,
    violation: Option<Violation>,
}

/// What a frame collected while it was on the stack.
pub(crate) struct FrameRecord {
    pub tracked: Vec<Rc<dyn Source>>,
    pub violation: Option<Violation>,
}

/// Guard that pops its frame when dropped, so the stack stays balanced even
/// if the computation panics.
pub struct ReactiveContext {
    node: NodeId,
    active: bool,
}

impl ReactiveContext {
    /// Push a frame for `node`.
    pub(crate) fn enter(node: NodeId, kind: FrameKind) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                node,
                kind,
                tracked: Vec::new(),
                violation: None,
            });
        });
        Self { node, active: true }
    }

    /// Pop the frame and hand back what it collected.
    pub(crate) fn exit(mut self) -> FrameRecord {
        self.active = false;
        let frame = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());
        match frame {
            Some(frame) => {
                debug_assert_eq!(frame.node, self.node, "reactive context mismatch");
                FrameRecord {
                    tracked: frame.tracked,
                    violation: frame.violation,
                }
            }
            None => FrameRecord {
                tracked: Vec::new(),
                violation: None,
            },
        }
    }

    /// Whether any computation is running.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The innermost running computation, if any.
    pub fn current() -> Option<(NodeId, FrameKind)> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(|f| (f.node, f.kind)))
    }

    /// The innermost derivation currently computing, if any.
    pub fn computing_derivation() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|f| f.kind == FrameKind::Derivation)
                .map(|f| f.node)
        })
    }

    /// Whether `node` already has a frame on the stack.
    pub fn is_evaluating(node: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().iter().any(|f| f.node == node))
    }

    /// Record a read of `source` on the innermost frame, if it is a derivation.
    pub(crate) fn track(source: Rc<dyn Source>) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(frame) = stack.last_mut() else {
                return;
            };
            if frame.kind != FrameKind::Derivation {
                return;
            }
            let id = source.node_id();
            if !frame.tracked.iter().any(|s| s.node_id() == id) {
                frame.tracked.push(source);
            }
        });
    }

    /// Pin a violation on the frame belonging to `node`. The first one wins.
    pub(crate) fn record_violation(node: NodeId, violation: Violation) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(frame) = stack.iter_mut().rev().find(|f| f.node == node) {
                frame.violation.get_or_insert(violation);
            }
        });
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if self.active {
            CONTEXT_STACK.with(|stack| {
                stack.borrow_mut().pop();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    struct FakeSource(NodeId);

    impl Source for FakeSource {
        fn node_id(&self) -> NodeId {
            self.0
        }

        fn current_version(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn context_tracks_frames() {
        let id = NodeId::new();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current().is_none());

        {
            let _ctx = ReactiveContext::enter(id, FrameKind::Effect);
            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current(), Some((id, FrameKind::Effect)));
            assert_eq!(ReactiveContext::computing_derivation(), None);
        }

        assert!(!ReactiveContext::is_active());
    }

    #[test]
    fn derivation_frames_collect_reads_once() {
        let id = NodeId::new();
        let cell = NodeId::new();
        let ctx = ReactiveContext::enter(id, FrameKind::Derivation);

        ReactiveContext::track(Rc::new(FakeSource(cell)));
        ReactiveContext::track(Rc::new(FakeSource(cell)));

        let record = ctx.exit();
        assert_eq!(record.tracked.len(), 1);
        assert_eq!(record.tracked[0].node_id(), cell);
        assert!(!ReactiveContext::is_active());
    }

    #[test]
    fn effect_frames_do_not_track() {
        let ctx = ReactiveContext::enter(NodeId::new(), FrameKind::Effect);
        ReactiveContext::track(Rc::new(FakeSource(NodeId::new())));
        assert!(ctx.exit().tracked.is_empty());
    }

    #[test]
    fn nested_frames_find_outer_derivation() {
        let outer = NodeId::new();
        let inner = NodeId::new();

        let _outer = ReactiveContext::enter(outer, FrameKind::Derivation);
        {
            let _inner = ReactiveContext::enter(inner, FrameKind::Effect);
            assert_eq!(ReactiveContext::computing_derivation(), Some(outer));
            assert!(ReactiveContext::is_evaluating(outer));
            assert!(ReactiveContext::is_evaluating(inner));
        }
        assert!(!ReactiveContext::is_evaluating(inner));
    }

    #[test]
    fn violation_is_pinned_on_named_frame() {
        let outer = NodeId::new();
        let inner = NodeId::new();
        let outer_ctx = ReactiveContext::enter(outer, FrameKind::Derivation);
        let inner_ctx = ReactiveContext::enter(inner, FrameKind::Derivation);

        ReactiveContext::record_violation(outer, Violation::DependencyCycle { node: outer });

        assert!(inner_ctx.exit().violation.is_none());
        assert_eq!(
            outer_ctx.exit().violation,
            Some(Violation::DependencyCycle { node: outer })
        );
    }
}
