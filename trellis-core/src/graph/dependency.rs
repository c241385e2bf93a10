//! Dependency Graph
//!
//! The graph records which nodes read from which. The runtime uses it for
//! two things:
//!
//! 1. Rejecting an edge that would close a cycle, so a derivation can never
//!    depend on itself, directly or transitively.
//! 2. Finding every node reachable from the cells committed in a batch, so
//!    the effect pass only inspects effects that could possibly be due.
//!
//! Version vectors stay the source of truth for staleness. The graph only
//! narrows the search.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};

use super::node::{Node, NodeId, NodeKind};
use crate::error::Violation;

/// Adjacency store for one component tree.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: IndexMap<NodeId, Node>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Re-adding an existing ID is a no-op.
    pub fn add_node(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes.entry(id).or_insert_with(|| Node::new(id, kind));
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.shift_remove(&node_id) {
            for dep_id in node.dependencies() {
                if let Some(dep) = self.nodes.get_mut(dep_id) {
                    dep.remove_dependent(node_id);
                }
            }
            for dependent_id in node.dependents() {
                if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                    dependent.remove_dependency(node_id);
                }
            }
        }
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether `to` is reachable from `from` by following dependent edges.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = IndexSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            let Some(node) = self.nodes.get(&node_id) else {
                continue;
            };
            for &next in node.dependents() {
                if next == to {
                    return true;
                }
                queue.push_back(next);
            }
        }
        false
    }

    /// Add an edge: `dependent` reads from `dependency`.
    ///
    /// Edges to or from unknown nodes are ignored.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) -> Result<(), Violation> {
        if !self.contains(dependency) || !self.contains(dependent) {
            return Ok(());
        }
        if self.reaches(dependent, dependency) {
            return Err(Violation::DependencyCycle { node: dependent });
        }
        self.link(dependency, dependent);
        Ok(())
    }

    /// Replace every dependency of `dependent` with `dependencies`.
    ///
    /// The graph is left untouched if any new edge would close a cycle.
    pub fn replace_dependencies<I>(&mut self, dependent: NodeId, dependencies: I) -> Result<(), Violation>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let Some(node) = self.nodes.get(&dependent) else {
            return Ok(());
        };
        let new_deps: IndexSet<NodeId> = dependencies
            .into_iter()
            .filter(|id| self.nodes.contains_key(id))
            .collect();

        if new_deps.iter().any(|&dep| self.reaches(dependent, dep)) {
            return Err(Violation::DependencyCycle { node: dependent });
        }

        let old_deps: Vec<NodeId> = node.dependencies().iter().copied().collect();
        for dep in old_deps {
            self.unlink(dep, dependent);
        }
        for dep in new_deps {
            self.link(dep, dependent);
        }
        Ok(())
    }

    /// Every node reachable from `sources`, excluding the sources themselves.
    pub fn affected_by<I>(&self, sources: I) -> IndexSet<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let sources: IndexSet<NodeId> = sources.into_iter().collect();
        let mut affected = IndexSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();

        for source in &sources {
            if let Some(node) = self.nodes.get(source) {
                queue.extend(node.dependents().iter().copied());
            }
        }

        while let Some(node_id) = queue.pop_front() {
            if sources.contains(&node_id) || !affected.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&node_id) {
                queue.extend(node.dependents().iter().copied());
            }
        }

        affected
    }

    fn link(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
    }

    fn unlink(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }
}
