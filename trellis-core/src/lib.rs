//! Trellis Core
//!
//! This crate provides the core runtime for the Trellis reactive component
//! model. It implements:
//!
//! - Reactive primitives (cells, derivations, effects)
//! - A per-tree batching scheduler with cleanup and teardown semantics
//! - Deferred (transition) updates and cancellable async completions
//! - A tokio-based host loop that feeds events and flushes
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, dependency tracking and the runtime
//! - `graph`: Dependency graph used for cycle checks and effect pruning
//! - `host`: Event queue driver that flushes after every external event
//! - `config`: Runtime configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::reactive::{Cell, Derivation, Effect, Runtime};
//!
//! let rt = Runtime::new();
//!
//! // Create a cell
//! let count = Cell::new(&rt, 0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = Derivation::new(&rt, &[&count], move || c.read() * 2);
//!
//! // Create an effect
//! let d = doubled.clone();
//! Effect::try_new(&rt, &[&doubled], move || {
//!     println!("Doubled: {}", d.get()?);
//!     Ok(None)
//! });
//!
//! // Update the cell and flush the batch
//! count.write(5)?;
//! rt.flush()?;
//! // Prints: "Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod host;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result, Violation};
pub use host::{Host, HostHandle, HostSummary};
