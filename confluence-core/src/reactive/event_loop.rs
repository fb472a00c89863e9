//! Forward references for cyclic graphs.
//!
//! An [`EventLoop`] is a placeholder event that can be used before the event
//! it stands for exists. It is created and bound inside one transaction; the
//! transaction refuses to close while the loop is unbound.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::behavior::Behavior;
use super::event::{Event, EventCore, Inlet, Port, Shape};
use super::listener::Target;
use super::transaction::Transaction;
use super::Value;
use crate::error::{Error, Result};
use crate::graph::NodeKind;

/// A placeholder event, bound later with [`EventLoop::loop_to`].
///
/// # Example
///
/// ```rust
/// use confluence_core::{EventLoop, EventSink, Transaction};
///
/// let input = EventSink::<i32>::new();
/// let tens = Transaction::run(|| {
///     let tens = EventLoop::<i32>::new();
///     let out = tens.map(|x: &i32| x * 10);
///     tens.loop_to(&input.filter(|x: &i32| *x > 0)).unwrap();
///     out
/// });
/// # let _ = tens;
/// ```
pub struct EventLoop<A> {
    event: Event<A>,
    bound: Arc<AtomicBool>,
}

impl<A: Value> EventLoop<A> {
    /// Create an unbound loop.
    ///
    /// Inside a transaction, that transaction fails with
    /// [`Error::LoopUnbound`] unless the loop is bound before it closes.
    /// Outside one, the loop can never be bound: every later
    /// [`EventLoop::loop_to`] fails with [`Error::NoTransaction`]. Use
    /// [`EventLoop::try_new`] to have that reported up front.
    pub fn new() -> Self {
        let core = EventCore::new(NodeKind::Loop, Shape::Stream);
        let bound = Arc::new(AtomicBool::new(false));
        Transaction::register_loop(core.node(), bound.clone());
        Self {
            event: Event { core },
            bound,
        }
    }

    /// Create an unbound loop, failing with [`Error::NoTransaction`] outside
    /// a transaction.
    pub fn try_new() -> Result<Self> {
        if !Transaction::is_active() {
            return Err(Error::NoTransaction {
                operation: "EventLoop::new",
            });
        }
        Ok(Self::new())
    }

    /// Bind the loop to the event it stands for.
    ///
    /// The placeholder's rank is promoted above `source`, and everything
    /// built on the placeholder is promoted with it.
    pub fn loop_to(&self, source: &Event<A>) -> Result<()> {
        if !Transaction::is_active() {
            return Err(Error::NoTransaction {
                operation: "EventLoop::loop_to",
            });
        }
        let node = self.event.node();
        if self.bound.load(Ordering::SeqCst) {
            return Err(Error::LoopAlreadyBound { node });
        }

        let inlet = Arc::new(Inlet::passthrough(&self.event.core, Port::Left));
        let subscription = source.core.attach_checked(inlet, Target::Node(node))?;
        self.event.core.hold_upstream(subscription);
        self.bound.store(true, Ordering::SeqCst);
        tracing::debug!(%node, source = %source.node(), "event loop bound");
        Ok(())
    }

    /// Whether [`EventLoop::loop_to`] has succeeded.
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }
}

impl<A: Value> Default for EventLoop<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Deref for EventLoop<A> {
    type Target = Event<A>;

    fn deref(&self) -> &Event<A> {
        &self.event
    }
}

/// A placeholder behavior, bound later with [`BehaviorLoop::loop_to`].
///
/// Sampling it before it is bound fails with [`Error::LoopSampledBeforeBind`].
pub struct BehaviorLoop<A> {
    behavior: Behavior<A>,
    updates: EventLoop<A>,
}

impl<A: Value> BehaviorLoop<A> {
    /// Create an unbound loop. Same rules as [`EventLoop::new`].
    pub fn new() -> Self {
        let updates = EventLoop::new();
        let behavior = Behavior::from_updates(updates.event.clone(), None);
        Self { behavior, updates }
    }

    /// Create an unbound loop, failing with [`Error::NoTransaction`] outside
    /// a transaction.
    pub fn try_new() -> Result<Self> {
        if !Transaction::is_active() {
            return Err(Error::NoTransaction {
                operation: "BehaviorLoop::new",
            });
        }
        Ok(Self::new())
    }

    /// Bind the loop to `source`, adopting its current value.
    pub fn loop_to(&self, source: &Behavior<A>) -> Result<()> {
        let initial = source.try_sample()?;
        self.updates.loop_to(&source.updates())?;
        self.behavior.reset(initial);
        Ok(())
    }
}

impl<A: Value> Default for BehaviorLoop<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Deref for BehaviorLoop<A> {
    type Target = Behavior<A>;

    fn deref(&self) -> &Behavior<A> {
        &self.behavior
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::sink::EventSink;
    use crate::reactive::transaction::with_engine;

    #[test]
    fn loop_outside_transaction_is_rejected() {
        let l = EventLoop::<i32>::new();
        let source = EventSink::<i32>::new();
        assert_eq!(
            l.loop_to(&source),
            Err(Error::NoTransaction {
                operation: "EventLoop::loop_to"
            })
        );
        assert!(!l.is_bound());
    }

    #[test]
    fn try_new_requires_a_transaction() {
        assert!(matches!(
            EventLoop::<i32>::try_new(),
            Err(Error::NoTransaction {
                operation: "EventLoop::new"
            })
        ));
        assert!(matches!(
            BehaviorLoop::<i32>::try_new(),
            Err(Error::NoTransaction {
                operation: "BehaviorLoop::new"
            })
        ));

        let source = EventSink::<i32>::new();
        let bound = Transaction::run(|| {
            let l = EventLoop::<i32>::try_new().unwrap();
            l.loop_to(&source).unwrap();
            l.is_bound()
        });
        assert!(bound);
    }

    #[test]
    fn second_binding_is_rejected() {
        let source = EventSink::<i32>::new();
        let outcome = Transaction::run(|| {
            let l = EventLoop::<i32>::new();
            l.loop_to(&source).unwrap();
            l.loop_to(&source)
        });
        assert!(matches!(outcome, Err(Error::LoopAlreadyBound { .. })));
    }

    #[test]
    fn binding_promotes_placeholder_and_dependents() {
        let source = EventSink::<i32>::new();
        let deep = source.map(|x| x + 1).map(|x| x + 1).map(|x| x + 1);
        let (l, downstream) = Transaction::run(|| {
            let l = EventLoop::<i32>::new();
            let downstream = l.map(|x: &i32| x * 2);
            l.loop_to(&deep).unwrap();
            (l, downstream)
        });

        with_engine(|eng| {
            let deep_rank = eng.graph.rank(deep.node());
            let loop_rank = eng.graph.rank(l.node());
            assert!(loop_rank > deep_rank);
            assert!(eng.graph.rank(downstream.node()) > loop_rank);
        });
    }

    #[test]
    fn behavior_loop_samples_after_bind() {
        let source = EventSink::new();
        let held = source.hold(3);
        let looped = Transaction::run(|| {
            let looped = BehaviorLoop::<i32>::new();
            assert_eq!(looped.try_sample(), Err(Error::LoopSampledBeforeBind));
            looped.loop_to(&held).unwrap();
            looped
        });
        assert_eq!(looped.sample(), 3);
        source.send(4);
        assert_eq!(looped.sample(), 4);
    }
}
