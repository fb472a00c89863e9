//! Behavior Implementation
//!
//! A Behavior is a value that changes over time. It always has a current value
//! and an updates event that fires when the value changes.
//!
//! # How Behaviors Update
//!
//! 1. The updates event fires inside a transaction. An internal receiver
//!    stages the new value against that transaction.
//!
//! 2. The first stage registers a commit in the transaction's last phase.
//!
//! 3. Until the commit runs, [`Behavior::sample`] keeps returning the value
//!    from before the transaction, so every node that samples during
//!    propagation sees one consistent snapshot.
//!
//! If the transaction aborts, the commit never runs and the staged value is
//! left behind with a stale transaction tag, where it is ignored.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::event::{Event, EventCore, Inlet, Port, Shape};
use super::listener::{Callback, Listener, Receiver, Target};
use super::staged::Staged;
use super::transaction::Transaction;
use super::Value;
use crate::error::{Error, Result};
use crate::graph::NodeKind;

struct BehaviorState<A> {
    /// `None` only for an unbound [`BehaviorLoop`](super::BehaviorLoop).
    value: Mutex<Staged<Option<A>>>,
    updates: Event<A>,
    _commit: Listener,
}

/// Stages each update of a behavior in the firing transaction.
struct Commit<A> {
    state: Weak<BehaviorState<A>>,
}

impl<A: Value> Receiver<A> for Commit<A> {
    fn on_fire(&self, value: &A) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let Some(txn) = Transaction::current_id() else {
            return;
        };
        let first = state.value.lock().stage(txn, Some(value.clone()));
        if first {
            let target = self.state.clone();
            Transaction::defer_commit(move || {
                if let Some(state) = target.upgrade() {
                    state.value.lock().commit(txn);
                }
            });
        }
    }
}

/// A time-varying value of `A`.
///
/// # Example
///
/// ```rust
/// use confluence_core::EventSink;
///
/// let deposits = EventSink::<i32>::new();
/// let balance = deposits.accum(100, |amount: &i32, total| total + amount);
///
/// deposits.send(5);
/// deposits.send(7);
/// assert_eq!(balance.sample(), 112);
/// ```
pub struct Behavior<A> {
    state: Arc<BehaviorState<A>>,
}

impl<A> Clone for Behavior<A> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<A: Value + fmt::Debug> fmt::Debug for Behavior<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("value", self.state.value.lock().committed())
            .field("updates", &self.state.updates)
            .finish()
    }
}

impl<A: Value> Behavior<A> {
    /// A behavior that follows `updates`, starting at `initial`.
    ///
    /// `updates` must fire at most once per transaction.
    pub(crate) fn from_updates(updates: Event<A>, initial: Option<A>) -> Self {
        let state = Arc::new_cyclic(|me: &Weak<BehaviorState<A>>| {
            let commit = Commit { state: me.clone() };
            let _commit = updates.core.attach(Arc::new(commit), Target::Internal);
            BehaviorState {
                value: Mutex::new(Staged::new(initial)),
                updates,
                _commit,
            }
        });
        Self { state }
    }

    /// A behavior that never changes.
    pub fn constant(value: A) -> Self {
        Self::from_updates(Event::never(), Some(value))
    }

    /// The current value.
    ///
    /// Inside a transaction this is the value from before the transaction
    /// began; updates made by the transaction become visible once it closes.
    ///
    /// # Panics
    ///
    /// Panics when called on a [`BehaviorLoop`](super::BehaviorLoop) that has
    /// not been bound yet. See [`Behavior::try_sample`].
    pub fn sample(&self) -> A {
        match self.try_sample() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// The current value, or [`Error::LoopSampledBeforeBind`].
    pub fn try_sample(&self) -> Result<A> {
        self.state
            .value
            .lock()
            .committed()
            .clone()
            .ok_or(Error::LoopSampledBeforeBind)
    }

    /// The event that fires with each new value.
    pub fn updates(&self) -> Event<A> {
        self.state.updates.clone()
    }

    pub(crate) fn reset(&self, value: A) {
        self.state.value.lock().reset(Some(value));
    }

    /// A behavior holding `f` applied to this one's value.
    pub fn map<B, F>(&self, f: F) -> Behavior<B>
    where
        B: Value,
        F: Fn(&A) -> B + Send + Sync + 'static,
    {
        let initial = self.try_sample().ok().map(|value| f(&value));
        let updates = self.updates().map(move |value| f(value));
        Behavior::from_updates(updates, initial)
    }

    /// A behavior combining this one and `other` through `f`.
    ///
    /// A transaction that updates both inputs updates the result once.
    pub fn lift2<B, C, F>(&self, other: &Behavior<B>, f: F) -> Behavior<C>
    where
        B: Value,
        C: Value,
        F: Fn(&A, &B) -> C + Send + Sync + 'static,
    {
        let left = self
            .updates()
            .map(|a| Change::<A, B> { left: Some(a.clone()), right: None });
        let right = other
            .updates()
            .map(|b| Change::<A, B> { left: None, right: Some(b.clone()) });
        let changes = left.merge_with(&right, Change::newer);

        let initial = match (self.try_sample(), other.try_sample()) {
            (Ok(a), Ok(b)) => Some(f(&a, &b)),
            _ => None,
        };
        let (a, b) = (self.clone(), other.clone());
        let updates = changes.map(move |change| {
            let a_now = change.left.clone().unwrap_or_else(|| a.sample());
            let b_now = change.right.clone().unwrap_or_else(|| b.sample());
            f(&a_now, &b_now)
        });
        Behavior::from_updates(updates, initial)
    }
}

/// Which inputs of a [`Behavior::lift2`] changed in one transaction.
#[derive(Clone)]
struct Change<A, B> {
    left: Option<A>,
    right: Option<B>,
}

impl<A: Clone, B: Clone> Change<A, B> {
    fn newer(older: &Self, newer: &Self) -> Self {
        Self {
            left: newer.left.clone().or_else(|| older.left.clone()),
            right: newer.right.clone().or_else(|| older.right.clone()),
        }
    }
}

impl<A: Value> Behavior<Event<A>> {
    /// An event mirroring whichever event this behavior holds.
    ///
    /// A switch takes effect in the last phase of the transaction that
    /// updated the behavior; occurrences of the new event in that same
    /// transaction are not delivered.
    pub fn switch_e(&self) -> Event<A> {
        let out = EventCore::new(NodeKind::Derived, Shape::Stream);
        let slot: Arc<Mutex<Option<Listener>>> = Arc::new(Mutex::new(None));

        if let Ok(initial) = self.try_sample() {
            let inner = initial.core.attach(
                Arc::new(Inlet::passthrough(&out, Port::Left)),
                Target::Node(out.node()),
            );
            *slot.lock() = Some(inner);
        }

        let target = Arc::downgrade(&out);
        let switcher = Callback(move |next: &Event<A>| {
            let target = target.clone();
            let slot = slot.clone();
            let next = next.clone();
            Transaction::defer_last(move || switch_to(&target, &slot, &next));
        });
        let subscription = self
            .updates()
            .core
            .attach(Arc::new(switcher), Target::Internal);
        out.hold_upstream(subscription);
        Event { core: out }
    }
}

fn switch_to<A: Value>(
    target: &Weak<EventCore<A>>,
    slot: &Mutex<Option<Listener>>,
    next: &Event<A>,
) {
    let Some(out) = target.upgrade() else {
        return;
    };
    let previous = slot.lock().take();
    drop(previous);

    let inlet = Arc::new(Inlet::passthrough(&out, Port::Left));
    match next.core.attach_checked(inlet, Target::Node(out.node())) {
        Ok(listener) => *slot.lock() = Some(listener),
        Err(err) => tracing::error!(%err, node = %out.node(), "switch_e could not follow the new event"),
    }
}
