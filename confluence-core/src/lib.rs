//! Confluence Core
//!
//! This crate provides a transactional, glitch-free functional reactive
//! programming engine. It implements:
//!
//! - Discrete event streams and their combinators
//! - Continuous behaviors with transaction-scoped updates
//! - Cyclic construction through event and behavior loops
//! - A ranked dependency graph that orders propagation
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: Events, behaviors, sinks, loops and transactions
//! - `graph`: The node arena, rank assignment and the rank-ordered queue
//!
//! # Example
//!
//! ```rust
//! use confluence_core::{BehaviorSink, EventSink, Transaction};
//! use std::sync::{Arc, Mutex};
//!
//! let price = BehaviorSink::new(10u32);
//! let orders = EventSink::<u32>::new();
//!
//! // Total cost of each order at the price in effect when it was placed
//! let cost = orders.snapshot_with(&price, |qty: &u32, price: &u32| qty * price);
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let sink = log.clone();
//! let _listener = cost.listen(move |c| sink.lock().unwrap().push(*c));
//!
//! orders.send(2);
//! Transaction::run(|| {
//!     // Both happen atomically: the order still sees the old price
//!     price.send(20);
//!     orders.send(3);
//! });
//! orders.send(1);
//!
//! assert_eq!(*log.lock().unwrap(), vec![20, 30, 20]);
//! ```

pub mod graph;
pub mod reactive;

mod config;
mod error;

pub use config::{EngineConfig, MAX_FIRINGS_ENV};
pub use error::{Error, ErrorKind, Result};
pub use graph::{GraphStats, NodeId};
pub use reactive::{
    Behavior, BehaviorLoop, BehaviorSink, Event, EventLoop, EventSink, Listener, ListenerId,
    Transaction, Value,
};
