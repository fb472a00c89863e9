//! Node Arena
//!
//! Every node lives here, keyed by its [`NodeId`]. Edges are handles, never
//! owning pointers, so forward references can close true dataflow cycles
//! without tangling destructor order.
//!
//! # Rank Assignment
//!
//! A node starts at rank zero. Linking `from -> to` ensures
//! `rank(to) > rank(from)`; when that promotes `to`, the promotion is pushed
//! transitively through everything downstream of `to`.
//!
//! Since ranks strictly increase along edges, `to` can only reach `from` when
//! `rank(to) <= rank(from)`, and the search never needs to visit a node ranked
//! above `from`. That keeps the cycle check cheap for ordinary combinators.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use serde::Serialize;

use super::node::{Fire, Node, NodeId, NodeKind, Rank};
use crate::error::{Error, Result};

/// Point-in-time counters for the whole graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    /// Live nodes.
    pub nodes: usize,
    /// Wired edges, counting duplicates.
    pub edges: usize,
    /// User callbacks attached through `listen`.
    pub listeners: usize,
}

/// The arena of all live nodes.
#[derive(Default)]
pub struct Graph {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, id: NodeId, kind: NodeKind, handler: Weak<dyn Fire>) -> NodeId {
        self.nodes.insert(id, Node::new(id, kind, handler));
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node.
    pub fn remove_node(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.remove(&node_id) {
            for dep_id in node.dependencies() {
                if let Some(dep) = self.nodes.get_mut(&dep_id) {
                    while dep.dependents().any(|d| d == node_id) {
                        dep.remove_dependent(node_id);
                    }
                }
            }

            for dependent_id in node.dependents() {
                if let Some(dependent) = self.nodes.get_mut(&dependent_id) {
                    while dependent.dependencies().any(|d| d == node_id) {
                        dependent.remove_dependency(node_id);
                    }
                }
            }
        }
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Current rank of a node. Unknown nodes rank zero.
    pub fn rank(&self, node_id: NodeId) -> Rank {
        self.nodes
            .get(&node_id)
            .map(Node::rank)
            .unwrap_or_default()
    }

    /// Upgrade the firing step of a node.
    pub fn handler(&self, node_id: NodeId) -> Option<Arc<dyn Fire>> {
        self.nodes.get(&node_id).and_then(|n| n.handler().upgrade())
    }

    /// Add a dependency edge: `to` depends on `from`.
    ///
    /// Fails with [`Error::Cycle`] if `from` is already downstream of `to`.
    pub fn link(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if self.reaches(to, from) {
            return Err(Error::Cycle { from, to });
        }
        self.add_edge(from, to);
        Ok(())
    }

    /// Add a dependency edge into a node that has no dependents yet.
    ///
    /// A fresh combinator node cannot close a cycle, so this cannot fail.
    pub fn link_fresh(&mut self, from: NodeId, to: NodeId) {
        debug_assert!(
            self.nodes
                .get(&to)
                .map_or(true, |n| n.dependents().next().is_none()),
            "link_fresh on a node that already has dependents"
        );
        self.add_edge(from, to);
    }

    /// Remove one dependency edge.
    pub fn unlink(&mut self, from: NodeId, to: NodeId) {
        if let Some(node) = self.nodes.get_mut(&from) {
            node.remove_dependent(to);
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            node.remove_dependency(from);
        }
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if let Some(node) = self.nodes.get_mut(&from) {
            node.add_dependent(to);
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            node.add_dependency(from);
        }
        let floor = self.rank(from).next();
        self.promote(to, floor);
    }

    /// Raise `start` to at least `floor`, pushing the promotion downstream.
    fn promote(&mut self, start: NodeId, floor: Rank) {
        let mut stack = vec![(start, floor)];
        while let Some((id, floor)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if node.rank() >= floor {
                continue;
            }
            tracing::debug!(node = %id, from = node.rank().raw(), to = floor.raw(), "rank promoted");
            node.set_rank(floor);
            stack.extend(node.dependents().map(|d| (d, floor.next())));
        }
    }

    /// Whether `goal` is reachable from `start` along downstream edges.
    fn reaches(&self, start: NodeId, goal: NodeId) -> bool {
        if start == goal {
            return true;
        }
        let ceiling = self.rank(goal);
        if self.rank(start) > ceiling {
            return false;
        }

        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if id == goal {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(
                    node.dependents()
                        .filter(|d| self.rank(*d) <= ceiling || *d == goal),
                );
            }
        }
        false
    }

    /// Count user callbacks on a node.
    pub fn add_listener(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.add_listener();
        }
    }

    /// Uncount a user callback on a node.
    pub fn remove_listener(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.remove_listener();
        }
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Counters for the whole graph.
    pub fn stats(&self) -> GraphStats {
        self.nodes.values().fold(GraphStats::default(), |mut s, n| {
            s.nodes += 1;
            s.edges += n.edge_count();
            s.listeners += n.listener_count();
            s
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    impl Fire for Inert {
        fn fire(&self) {}
        fn discard(&self) {}
    }

    fn add(graph: &mut Graph, kind: NodeKind) -> NodeId {
        graph.add_node(NodeId::new(), kind, Weak::<Inert>::new())
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = Graph::new();
        let id1 = add(&mut graph, NodeKind::Source);
        let id2 = add(&mut graph, NodeKind::Derived);
        assert_eq!(graph.node_count(), 2);

        graph.remove_node(id1);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.get_node(id1).is_none());
        assert!(graph.get_node(id2).is_some());
    }

    #[test]
    fn linking_assigns_increasing_ranks() {
        let mut graph = Graph::new();
        let source = add(&mut graph, NodeKind::Source);
        let mapped = add(&mut graph, NodeKind::Derived);
        let merged = add(&mut graph, NodeKind::Derived);

        graph.link_fresh(source, mapped);
        graph.link_fresh(source, merged);
        graph.link(mapped, merged).unwrap();

        assert_eq!(graph.rank(source), Rank::ZERO);
        assert!(graph.rank(mapped) > graph.rank(source));
        assert!(graph.rank(merged) > graph.rank(mapped));
    }

    #[test]
    fn late_link_promotes_transitively() {
        let mut graph = Graph::new();
        let placeholder = add(&mut graph, NodeKind::Loop);
        let downstream = add(&mut graph, NodeKind::Derived);
        let further = add(&mut graph, NodeKind::Derived);
        graph.link_fresh(placeholder, downstream);
        graph.link_fresh(downstream, further);

        let a = add(&mut graph, NodeKind::Source);
        let b = add(&mut graph, NodeKind::Derived);
        let c = add(&mut graph, NodeKind::Derived);
        graph.link_fresh(a, b);
        graph.link_fresh(b, c);

        graph.link(c, placeholder).unwrap();

        assert!(graph.rank(placeholder) > graph.rank(c));
        assert!(graph.rank(downstream) > graph.rank(placeholder));
        assert!(graph.rank(further) > graph.rank(downstream));
    }

    #[test]
    fn true_cycle_is_rejected() {
        let mut graph = Graph::new();
        let placeholder = add(&mut graph, NodeKind::Loop);
        let mapped = add(&mut graph, NodeKind::Derived);
        graph.link_fresh(placeholder, mapped);

        let err = graph.link(mapped, placeholder).unwrap_err();
        assert_eq!(
            err,
            Error::Cycle {
                from: mapped,
                to: placeholder
            }
        );
        assert!(graph.get_node(placeholder).unwrap().dependencies().next().is_none());
    }

    #[test]
    fn self_link_is_a_cycle() {
        let mut graph = Graph::new();
        let node = add(&mut graph, NodeKind::Loop);
        assert!(graph.link(node, node).is_err());
    }

    #[test]
    fn unlink_keeps_duplicate_edge() {
        let mut graph = Graph::new();
        let source = add(&mut graph, NodeKind::Source);
        let merged = add(&mut graph, NodeKind::Derived);
        graph.link_fresh(source, merged);
        graph.link_fresh(source, merged);
        assert_eq!(graph.stats().edges, 2);

        graph.unlink(source, merged);
        assert_eq!(graph.stats().edges, 1);
    }

    #[test]
    fn remove_node_drops_all_edges() {
        let mut graph = Graph::new();
        let source = add(&mut graph, NodeKind::Source);
        let merged = add(&mut graph, NodeKind::Derived);
        graph.link_fresh(source, merged);
        graph.link_fresh(source, merged);

        graph.remove_node(merged);
        assert_eq!(graph.stats().edges, 0);
        assert_eq!(graph.stats().nodes, 1);
    }

    #[test]
    fn stats_count_listeners() {
        let mut graph = Graph::new();
        let source = add(&mut graph, NodeKind::Source);
        graph.add_listener(source);
        graph.add_listener(source);
        graph.remove_listener(source);
        assert_eq!(
            graph.stats(),
            GraphStats {
                nodes: 1,
                edges: 0,
                listeners: 1
            }
        );
    }
}
