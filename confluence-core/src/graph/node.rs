//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use indexmap::IndexMap;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Topological priority of a node. Lower ranks fire first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rank(u64);

impl Rank {
    /// The rank every node starts with.
    pub const ZERO: Rank = Rank(0);

    /// The smallest rank strictly after this one.
    pub fn next(self) -> Rank {
        Rank(self.0 + 1)
    }

    /// Get the raw rank value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// An externally triggered node (sinks, `never`, delay outputs).
    /// These have no rank-bearing dependencies.
    Source,

    /// A combinator node fed by one or more upstream nodes.
    Derived,

    /// A forward-reference placeholder, bound to its source later.
    Loop,
}

/// The firing step of a node, implemented by the typed event cores.
///
/// The graph only ever holds these weakly; the typed handles own them.
pub trait Fire: Send + Sync {
    /// Drain this node's inbox and deliver the results to its receivers.
    fn fire(&self);

    /// Drop whatever this node buffered in an aborted transaction.
    fn discard(&self);
}

/// A node in the dependency graph.
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// What kind of node this is.
    kind: NodeKind,

    /// Current topological priority.
    rank: Rank,

    /// Upstream nodes, with one count per wired edge.
    dependencies: IndexMap<NodeId, usize>,

    /// Downstream nodes, with one count per wired edge.
    /// `e.merge(e)` wires the same pair twice.
    dependents: IndexMap<NodeId, usize>,

    /// Number of user callbacks attached through `listen`.
    listeners: usize,

    /// The typed firing step.
    handler: Weak<dyn Fire>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(id: NodeId, kind: NodeKind, handler: Weak<dyn Fire>) -> Self {
        Self {
            id,
            kind,
            rank: Rank::ZERO,
            dependencies: IndexMap::new(),
            dependents: IndexMap::new(),
            listeners: 0,
            handler,
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the node's rank.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub(crate) fn set_rank(&mut self, rank: Rank) {
        self.rank = rank;
    }

    /// The typed firing step, if its owner is still alive.
    pub(crate) fn handler(&self) -> &Weak<dyn Fire> {
        &self.handler
    }

    /// Add one edge from `node_id` to this node.
    pub fn add_dependency(&mut self, node_id: NodeId) {
        *self.dependencies.entry(node_id).or_insert(0) += 1;
    }

    /// Remove one edge from `node_id` to this node.
    pub fn remove_dependency(&mut self, node_id: NodeId) {
        decrement(&mut self.dependencies, node_id);
    }

    /// Get all upstream nodes.
    pub fn dependencies(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.dependencies.keys().copied()
    }

    /// Add one edge from this node to `node_id`.
    pub fn add_dependent(&mut self, node_id: NodeId) {
        *self.dependents.entry(node_id).or_insert(0) += 1;
    }

    /// Remove one edge from this node to `node_id`.
    pub fn remove_dependent(&mut self, node_id: NodeId) {
        decrement(&mut self.dependents, node_id);
    }

    /// Get all downstream nodes.
    pub fn dependents(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.dependents.keys().copied()
    }

    /// Number of outgoing edges, counting duplicates.
    pub fn edge_count(&self) -> usize {
        self.dependents.values().sum()
    }

    /// Number of user callbacks attached to this node.
    pub fn listener_count(&self) -> usize {
        self.listeners
    }

    pub(crate) fn add_listener(&mut self) {
        self.listeners += 1;
    }

    pub(crate) fn remove_listener(&mut self) {
        self.listeners = self.listeners.saturating_sub(1);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("rank", &self.rank)
            .field("dependents", &self.dependents)
            .field("listeners", &self.listeners)
            .finish()
    }
}

fn decrement(edges: &mut IndexMap<NodeId, usize>, node_id: NodeId) {
    if let Some(count) = edges.get_mut(&node_id) {
        *count -= 1;
        if *count == 0 {
            edges.shift_remove(&node_id);
        }
    }
}
