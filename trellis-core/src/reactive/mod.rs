//! Reactive Primitives
//!
//! This module implements the core reactive system: cells, derivations,
//! effects, and the runtime that schedules them for one component tree.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a versioned storage location. Writes are staged into the current
//! batch and become visible, with one version bump per cell, when the runtime
//! flushes. Read-only [`CellReader`]s carry shared values down a tree.
//!
//! ## Derivations
//!
//! A Derivation caches a pure computation over its inputs. It recomputes only
//! when read after an input's version changed, and refuses cell writes made
//! while it computes.
//!
//! ## Effects
//!
//! An Effect runs a side-effecting action after a flush whenever the versions
//! of its declared inputs differ from the last run. The action may return a
//! [`Cleanup`], which runs before the next action and when the tree unmounts.
//!
//! ## Everything else
//!
//! [`Reducer`] routes state changes through a reduce function, [`Ref`] holds
//! data that must never trigger anything, transitions defer expensive writes
//! to a low-priority batch, and [`CancelToken`] lets a cleanup stop a stale
//! async completion from writing.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a thread-local stack of evaluation frames. When a
//! cell is read we check whether the innermost frame belongs to a derivation
//! and, if so, record the cell as one of its inputs. The same stack lets a
//! write detect that it is happening inside a derivation.
//!
//! Staleness is decided by comparing version vectors, not by pushing dirty
//! flags. A derivation that nobody reads after a write never recomputes, and
//! an effect over a derivation stays quiet unless that derivation actually
//! recomputed.

mod cancel;
mod cell;
mod context;
mod derivation;
mod effect;
mod reducer;
mod reference;
mod runtime;
mod source;
mod transition;

pub use cancel::{CancelToken, GuardedWriter};
pub use cell::{Cell, CellReader};
pub use context::{FrameKind, ReactiveContext};
pub use derivation::Derivation;
pub use effect::{Cleanup, Effect};
pub use reducer::Reducer;
pub use reference::Ref;
pub use runtime::{FlushReport, Phase, Runtime};
pub use source::{Dependency, InputVersions, Source};
