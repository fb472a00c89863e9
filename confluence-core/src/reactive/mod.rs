//! Reactive Primitives
//!
//! This module implements the two FRP abstractions, events and behaviors, and
//! the transaction machinery that propagates changes between them.
//!
//! # Concepts
//!
//! ## Events
//!
//! An [`Event`] is a stream of discrete occurrences. Events are built from
//! sinks ([`EventSink`]) and combinators (`map`, `merge`, `filter`,
//! `coalesce`, `once`, `delay`, `snapshot`, `gate`, `collect`).
//!
//! ## Behaviors
//!
//! A [`Behavior`] always has a value. It changes only when a transaction
//! closes, so everything that samples it during propagation agrees on what it
//! held before the transaction began.
//!
//! ## Transactions
//!
//! Every `send` happens inside a [`Transaction`]. Within one, nodes fire in
//! rank order, lowest first, and each node fires at most once. This is what
//! makes propagation glitch-free: no listener ever sees a combination of old
//! and new inputs.
//!
//! # Implementation Notes
//!
//! Each event owns a node in the global [`Graph`](crate::graph::Graph). The
//! graph only orders firing; the values travel through per-node inboxes and
//! typed receivers held by the events themselves.

mod behavior;
mod event;
mod event_loop;
mod listener;
mod sink;
mod staged;
mod transaction;

pub use behavior::Behavior;
pub use event::Event;
pub use event_loop::{BehaviorLoop, EventLoop};
pub use listener::{Listener, ListenerId};
pub use sink::{BehaviorSink, EventSink};
pub use transaction::Transaction;

/// Bound for everything carried by events and behaviors.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}
