//! Dependency Graph
//!
//! This module implements the ranked dataflow graph that orders propagation
//! inside a transaction.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent event streams (sinks, combinators, loop placeholders)
//! - Edges represent dependencies: if A is fed by B, there is an edge from B to A
//! - Every node carries a rank strictly above the ranks of its dependencies
//!
//! When a sink fires, its node is scheduled. The transaction then pops pending
//! nodes lowest rank first, so each node fires only after everything feeding
//! it in the same transaction has fired.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a central arena keyed by [`NodeId`] rather than owning each
//!    other, which lets forward references close cycles safely.
//!
//! 2. The arena holds typed firing steps only weakly. Ownership stays with the
//!    `Event` handles and the subscriptions between them.
//!
//! 3. Both forward (dependents) and reverse (dependencies) edges are kept, so
//!    removing a node cleans up both sides.

mod arena;
mod node;
mod scheduler;

pub use arena::{Graph, GraphStats};
pub use node::{Fire, Node, NodeId, NodeKind, Rank};
pub use scheduler::RankQueue;
