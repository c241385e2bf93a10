//! Dependency Graph
//!
//! This module implements the graph that tracks relationships between cells,
//! derivations and effects.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent cells, derivations and effects
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a batch commits, the runtime walks the graph from the committed cells
//! to find every effect that might be due. Adding an edge that would create a
//! cycle is refused.
//!
//! We maintain both forward (dependencies) and reverse (dependents) edges so
//! the graph can be traversed in either direction.

mod dependency;
mod node;

pub use dependency::DependencyGraph;
pub use node::{Node, NodeId, NodeKind};
