//! Rank Scheduler
//!
//! The scheduler holds the nodes that must fire in the current transaction
//! and hands them out lowest rank first, so a node never fires before a
//! same-transaction dependency that determines its input.
//!
//! # Algorithm
//!
//! 1. Scheduling a node records it once; scheduling it again while it is still
//!    pending is a no-op.
//! 2. Pending nodes are kept in a min-heap keyed by `(rank, arrival)`, so equal
//!    ranks pop in the order they were scheduled.
//! 3. A node's rank can be promoted while it waits (a loop bound mid
//!    transaction). The heap entry then carries a stale rank; `pop` compares it
//!    against the current rank and re-queues the node instead of firing it
//!    early.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use super::arena::Graph;
use super::node::{NodeId, Rank};

/// Lowest-rank-first queue of nodes pending in one transaction.
#[derive(Debug, Default)]
pub struct RankQueue {
    heap: BinaryHeap<Reverse<(Rank, u64, NodeId)>>,
    pending: HashSet<NodeId>,
    arrivals: u64,
}

impl RankQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a node at its current rank.
    ///
    /// Returns `false` if the node was already pending.
    pub fn schedule(&mut self, node_id: NodeId, rank: Rank) -> bool {
        if !self.pending.insert(node_id) {
            return false;
        }
        self.push(node_id, rank);
        true
    }

    fn push(&mut self, node_id: NodeId, rank: Rank) {
        self.arrivals += 1;
        self.heap.push(Reverse((rank, self.arrivals, node_id)));
    }

    /// Pop the lowest-rank node whose queued rank is still current.
    pub fn pop(&mut self, graph: &Graph) -> Option<NodeId> {
        while let Some(Reverse((rank, _, node_id))) = self.heap.pop() {
            let current = graph.rank(node_id);
            if current != rank && graph.get_node(node_id).is_some() {
                self.push(node_id, current);
                continue;
            }
            self.pending.remove(&node_id);
            return Some(node_id);
        }
        None
    }

    /// Remove every pending node, returning them in no particular order.
    pub fn drain(&mut self) -> Vec<NodeId> {
        self.heap.clear();
        self.pending.drain().collect()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of pending nodes.
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;
    use crate::graph::node::{Fire, NodeKind};

    struct Inert;

    impl Fire for Inert {
        fn fire(&self) {}
        fn discard(&self) {}
    }

    fn add(graph: &mut Graph) -> NodeId {
        graph.add_node(NodeId::new(), NodeKind::Derived, Weak::<Inert>::new())
    }

    #[test]
    fn pops_in_rank_order() {
        let mut graph = Graph::new();
        let a = add(&mut graph);
        let b = add(&mut graph);
        let c = add(&mut graph);
        graph.link_fresh(a, b);
        graph.link_fresh(b, c);

        let mut queue = RankQueue::new();
        queue.schedule(c, graph.rank(c));
        queue.schedule(a, graph.rank(a));
        queue.schedule(b, graph.rank(b));

        assert_eq!(queue.pop(&graph), Some(a));
        assert_eq!(queue.pop(&graph), Some(b));
        assert_eq!(queue.pop(&graph), Some(c));
        assert_eq!(queue.pop(&graph), None);
    }

    #[test]
    fn scheduling_is_idempotent() {
        let mut graph = Graph::new();
        let a = add(&mut graph);

        let mut queue = RankQueue::new();
        assert!(queue.schedule(a, graph.rank(a)));
        assert!(!queue.schedule(a, graph.rank(a)));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop(&graph), Some(a));
        assert!(queue.is_empty());

        // Once popped, the node may be scheduled again.
        assert!(queue.schedule(a, graph.rank(a)));
    }

    #[test]
    fn equal_ranks_pop_in_arrival_order() {
        let mut graph = Graph::new();
        let first = add(&mut graph);
        let second = add(&mut graph);

        let mut queue = RankQueue::new();
        queue.schedule(second, Rank::ZERO);
        queue.schedule(first, Rank::ZERO);

        assert_eq!(queue.pop(&graph), Some(second));
        assert_eq!(queue.pop(&graph), Some(first));
    }

    #[test]
    fn promoted_node_is_requeued() {
        let mut graph = Graph::new();
        let placeholder = add(&mut graph);
        let source = add(&mut graph);
        let mapped = add(&mut graph);
        graph.link_fresh(source, mapped);

        let mut queue = RankQueue::new();
        queue.schedule(placeholder, graph.rank(placeholder));
        queue.schedule(mapped, graph.rank(mapped));

        // Binding the placeholder behind `mapped` outranks it.
        graph.link(mapped, placeholder).unwrap();

        assert_eq!(queue.pop(&graph), Some(mapped));
        assert_eq!(queue.pop(&graph), Some(placeholder));
    }

    #[test]
    fn drain_empties_the_queue() {
        let mut graph = Graph::new();
        let a = add(&mut graph);
        let b = add(&mut graph);

        let mut queue = RankQueue::new();
        queue.schedule(a, Rank::ZERO);
        queue.schedule(b, Rank::ZERO);

        let mut drained = queue.drain();
        drained.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(drained, expected);
        assert!(queue.is_empty());
        assert_eq!(queue.pop(&graph), None);
    }
}
