//! Event Implementation
//!
//! An [`Event`] is a discrete stream of occurrences. Every event owns one node
//! in the ranked graph and a shared core holding its per-transaction inbox and
//! the receivers attached to it.
//!
//! # How Events Fire
//!
//! 1. An occurrence is pushed into the core's inbox, on the left or right port,
//!    and the node is scheduled in the current transaction.
//!
//! 2. When the node's rank comes up, the inbox is drained (left port first,
//!    then right) and reduced according to the node's [`Shape`].
//!
//! 3. Each resulting value is handed to every receiver. Receivers that feed a
//!    combinator transform the value and push it into the downstream inbox,
//!    which in turn schedules the downstream node at its higher rank.
//!
//! Because every node buffers a whole transaction's worth of input before it
//! fires, merge order is decided by port rather than by send order, and
//! `coalesce` sees every simultaneous occurrence at once.
//!
//! # Ownership
//!
//! Downstream cores hold strong handles on their upstream (through the
//! [`Listener`]s in `upstream`); upstream cores only hold inlets pointing
//! weakly downstream. Dropping the last handle to a derived event therefore
//! releases its subscriptions and removes its node from the arena.

use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::behavior::Behavior;
use super::listener::{Callback, Detach, Listener, ListenerId, Receiver, Target};
use super::staged::Staged;
use super::transaction::{try_with_engine, with_engine, Transaction};
use super::Value;
use crate::error::Result;
use crate::graph::{Fire, NodeId, NodeKind};

/// Which side of a node an occurrence arrives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Port {
    Left,
    Right,
}

/// Occurrences delivered to a node in the current transaction.
struct Inbox<A> {
    left: SmallVec<[A; 2]>,
    right: SmallVec<[A; 2]>,
}

impl<A> Inbox<A> {
    fn new() -> Self {
        Self {
            left: SmallVec::new(),
            right: SmallVec::new(),
        }
    }

    fn push(&mut self, port: Port, value: A) {
        match port {
            Port::Left => self.left.push(value),
            Port::Right => self.right.push(value),
        }
    }

    /// Everything buffered, left port first, each port in arrival order.
    fn take(&mut self) -> Vec<A> {
        let mut batch: Vec<A> = mem::take(&mut self.left).into_iter().collect();
        batch.extend(mem::take(&mut self.right));
        batch
    }
}

type CombineFn<A> = Arc<dyn Fn(&A, &A) -> A + Send + Sync>;

/// How a node reduces one transaction's inbox before delivering it.
pub(crate) enum Shape<A> {
    /// Deliver every occurrence.
    Stream,
    /// Fold all occurrences into one, left to right in arrival order.
    Coalesce(CombineFn<A>),
    /// Deliver the first occurrence of the first transaction that commits,
    /// then release the upstream.
    Once,
}

/// The shared state behind an [`Event`] handle.
pub(crate) struct EventCore<A> {
    node: NodeId,
    me: Weak<EventCore<A>>,
    shape: Shape<A>,
    inbox: Mutex<Inbox<A>>,
    receivers: Mutex<Vec<(ListenerId, Arc<dyn Receiver<A>>)>>,
    /// Subscriptions this node needs to be fed. Released with the node.
    upstream: Mutex<Vec<Listener>>,
    /// Set once a `once` node has fired in a committed transaction.
    spent: Mutex<Staged<bool>>,
}

impl<A: Value> EventCore<A> {
    pub(crate) fn new(kind: NodeKind, shape: Shape<A>) -> Arc<Self> {
        let node = NodeId::new();
        let core = Arc::new_cyclic(|me| Self {
            node,
            me: me.clone(),
            shape,
            inbox: Mutex::new(Inbox::new()),
            receivers: Mutex::new(Vec::new()),
            upstream: Mutex::new(Vec::new()),
            spent: Mutex::new(Staged::new(false)),
        });
        let handler: Weak<dyn Fire> = Arc::downgrade(&core) as Weak<dyn Fire>;
        with_engine(|eng| eng.graph.add_node(node, kind, handler));
        core
    }

    pub(crate) fn node(&self) -> NodeId {
        self.node
    }

    /// Deliver an occurrence and schedule this node.
    pub(crate) fn push(&self, port: Port, value: A) {
        self.inbox.lock().push(port, value);
        Transaction::schedule(self.node);
    }

    /// Attach a receiver, wiring a fresh downstream node without a cycle check.
    pub(crate) fn attach(self: &Arc<Self>, receiver: Arc<dyn Receiver<A>>, target: Target) -> Listener {
        with_engine(|eng| match target {
            Target::Node(to) => eng.graph.link_fresh(self.node, to),
            Target::User => eng.graph.add_listener(self.node),
            Target::Internal => {}
        });
        self.register(receiver, target)
    }

    /// Attach a receiver into a node that may already have dependents.
    pub(crate) fn attach_checked(
        self: &Arc<Self>,
        receiver: Arc<dyn Receiver<A>>,
        target: Target,
    ) -> Result<Listener> {
        with_engine(|eng| match target {
            Target::Node(to) => eng.graph.link(self.node, to),
            Target::User => {
                eng.graph.add_listener(self.node);
                Ok(())
            }
            Target::Internal => Ok(()),
        })?;
        Ok(self.register(receiver, target))
    }

    fn register(self: &Arc<Self>, receiver: Arc<dyn Receiver<A>>, target: Target) -> Listener {
        let id = ListenerId::new();
        self.receivers.lock().push((id, receiver));
        let source: Arc<dyn Detach> = self.clone();
        Listener::new(source, id, target)
    }

    /// Keep `listener` alive for as long as this node lives.
    pub(crate) fn hold_upstream(&self, listener: Listener) {
        self.upstream.lock().push(listener);
    }

    fn release_upstream(&self) {
        let released = mem::take(&mut *self.upstream.lock());
        drop(released);
    }

    fn receiver_count(&self) -> usize {
        self.receivers.lock().len()
    }
}

impl<A: Value> Fire for EventCore<A> {
    fn fire(&self) {
        let batch = self.inbox.lock().take();
        if batch.is_empty() {
            return;
        }

        let out: Vec<A> = match &self.shape {
            Shape::Stream => batch,
            Shape::Coalesce(combine) => batch
                .into_iter()
                .reduce(|acc, value| combine(&acc, &value))
                .into_iter()
                .collect(),
            Shape::Once => {
                let Some(txn) = Transaction::current_id() else {
                    return;
                };
                {
                    let mut spent = self.spent.lock();
                    if *spent.latest(txn) {
                        return;
                    }
                    spent.stage(txn, true);
                }
                let me = self.me.clone();
                Transaction::defer_commit(move || {
                    if let Some(core) = me.upgrade() {
                        core.spent.lock().commit(txn);
                        core.release_upstream();
                    }
                });
                batch.into_iter().take(1).collect()
            }
        };

        let receivers: Vec<Arc<dyn Receiver<A>>> = self
            .receivers
            .lock()
            .iter()
            .map(|(_, receiver)| receiver.clone())
            .collect();
        tracing::trace!(node = %self.node, occurrences = out.len(), receivers = receivers.len(), "delivering");
        for value in &out {
            for receiver in &receivers {
                receiver.on_fire(value);
            }
        }
    }

    fn discard(&self) {
        let dropped = self.inbox.lock().take();
        drop(dropped);
    }
}

impl<A: Value> Detach for EventCore<A> {
    fn detach(&self, id: ListenerId, target: Target) {
        let removed: Vec<_> = {
            let mut receivers = self.receivers.lock();
            let (gone, kept) = mem::take(&mut *receivers)
                .into_iter()
                .partition(|(rid, _)| *rid == id);
            *receivers = kept;
            gone
        };
        if removed.is_empty() {
            return;
        }
        with_engine(|eng| match target {
            Target::User => eng.graph.remove_listener(self.node),
            Target::Node(to) => eng.graph.unlink(self.node, to),
            Target::Internal => {}
        });
        // The receiver may own the last handle to another node.
        drop(removed);
    }
}

impl<A> Drop for EventCore<A> {
    fn drop(&mut self) {
        let node = self.node;
        if try_with_engine(|eng| eng.graph.remove_node(node)).is_none() {
            tracing::warn!(%node, "event dropped while the engine was busy; node left in the arena");
        }
    }
}

/// Feeds occurrences from an upstream event into a downstream node.
pub(crate) struct Inlet<A, B> {
    target: Weak<EventCore<B>>,
    port: Port,
    transform: Box<dyn Fn(&A) -> Option<B> + Send + Sync>,
}

impl<A, B: Value> Inlet<A, B> {
    pub(crate) fn new<F>(target: &Arc<EventCore<B>>, port: Port, transform: F) -> Self
    where
        F: Fn(&A) -> Option<B> + Send + Sync + 'static,
    {
        Self {
            target: Arc::downgrade(target),
            port,
            transform: Box::new(transform),
        }
    }
}

impl<A: Value> Inlet<A, A> {
    pub(crate) fn passthrough(target: &Arc<EventCore<A>>, port: Port) -> Self {
        Self::new(target, port, |value: &A| Some(value.clone()))
    }
}

impl<A, B: Value> Receiver<A> for Inlet<A, B> {
    fn on_fire(&self, value: &A) {
        if let Some(target) = self.target.upgrade() {
            if let Some(out) = (self.transform)(value) {
                target.push(self.port, out);
            }
        }
    }
}

/// Re-fires each occurrence in a new transaction after the current one closes.
struct Delay<A> {
    target: Weak<EventCore<A>>,
}

impl<A: Value> Receiver<A> for Delay<A> {
    fn on_fire(&self, value: &A) {
        let target = self.target.clone();
        let value = value.clone();
        Transaction::post(move || {
            if let Some(core) = target.upgrade() {
                Transaction::run(|| core.push(Port::Left, value));
            }
        });
    }
}

/// A discrete stream of occurrences of `A`.
///
/// Cloning an `Event` clones the handle; both refer to the same node.
///
/// # Example
///
/// ```rust
/// use confluence_core::EventSink;
/// use std::sync::{Arc, Mutex};
///
/// let clicks = EventSink::<i32>::new();
/// let doubled = clicks.map(|x: &i32| x * 2);
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let out = seen.clone();
/// let _l = doubled.listen(move |x| out.lock().unwrap().push(*x));
///
/// clicks.send(21);
/// assert_eq!(*seen.lock().unwrap(), vec![42]);
/// ```
pub struct Event<A> {
    pub(crate) core: Arc<EventCore<A>>,
}

impl<A> Clone for Event<A> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<A> std::fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("node", &self.core.node).finish()
    }
}

impl<A: Value> Event<A> {
    pub(crate) fn source() -> Self {
        Self {
            core: EventCore::new(NodeKind::Source, Shape::Stream),
        }
    }

    /// An event that never fires.
    pub fn never() -> Self {
        Self::source()
    }

    /// The node this event fires from.
    pub fn node(&self) -> NodeId {
        self.core.node()
    }

    /// Number of receivers attached to this event, internal ones included.
    pub fn listener_count(&self) -> usize {
        self.core.receiver_count()
    }

    /// Call `callback` with every occurrence.
    pub fn listen<F>(&self, callback: F) -> Listener
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.core.attach(Arc::new(Callback(callback)), Target::User)
    }

    /// Build a combinator node fed by this event through `transform`.
    fn derive<B, F>(&self, shape: Shape<B>, transform: F) -> Event<B>
    where
        B: Value,
        F: Fn(&A) -> Option<B> + Send + Sync + 'static,
    {
        let out = EventCore::new(NodeKind::Derived, shape);
        let inlet = Inlet::new(&out, Port::Left, transform);
        let subscription = self.core.attach(Arc::new(inlet), Target::Node(out.node()));
        out.hold_upstream(subscription);
        Event { core: out }
    }

    /// Transform each occurrence.
    pub fn map<B, F>(&self, f: F) -> Event<B>
    where
        B: Value,
        F: Fn(&A) -> B + Send + Sync + 'static,
    {
        self.derive(Shape::Stream, move |a| Some(f(a)))
    }

    /// Keep only occurrences satisfying `predicate`.
    pub fn filter<P>(&self, predicate: P) -> Event<A>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.derive(Shape::Stream, move |a| predicate(a).then(|| a.clone()))
    }

    /// Transform each occurrence, dropping those mapped to `None`.
    pub fn filter_map<B, F>(&self, f: F) -> Event<B>
    where
        B: Value,
        F: Fn(&A) -> Option<B> + Send + Sync + 'static,
    {
        self.derive(Shape::Stream, f)
    }

    /// Fire whenever either event fires.
    ///
    /// Within one transaction every occurrence of `self` is delivered before
    /// any occurrence of `other`, whatever order they were sent in.
    pub fn merge(&self, other: &Event<A>) -> Event<A> {
        let out = EventCore::new(NodeKind::Derived, Shape::Stream);
        let left = self
            .core
            .attach(Arc::new(Inlet::passthrough(&out, Port::Left)), Target::Node(out.node()));
        let right = other
            .core
            .attach(Arc::new(Inlet::passthrough(&out, Port::Right)), Target::Node(out.node()));
        out.hold_upstream(left);
        out.hold_upstream(right);
        Event { core: out }
    }

    /// Merge, folding simultaneous occurrences into one with `combine`.
    pub fn merge_with<F>(&self, other: &Event<A>, combine: F) -> Event<A>
    where
        F: Fn(&A, &A) -> A + Send + Sync + 'static,
    {
        self.merge(other).coalesce(combine)
    }

    /// Reduce all occurrences within one transaction to a single one.
    ///
    /// The fold is strictly left to right in arrival order.
    pub fn coalesce<F>(&self, combine: F) -> Event<A>
    where
        F: Fn(&A, &A) -> A + Send + Sync + 'static,
    {
        self.derive(Shape::Coalesce(Arc::new(combine)), |a| Some(a.clone()))
    }

    /// Only the last occurrence of each transaction.
    pub(crate) fn last_firing_only(&self) -> Event<A> {
        self.coalesce(|_, last| last.clone())
    }

    /// Only the first occurrence ever.
    ///
    /// The subscription to `self` is released when the transaction that
    /// delivered it commits. If that transaction aborts, the next occurrence
    /// is delivered instead.
    pub fn once(&self) -> Event<A> {
        self.derive(Shape::Once, |a| Some(a.clone()))
    }

    /// Re-fire each occurrence in a new transaction after this one commits.
    ///
    /// Behaviors updated by the original occurrence are already committed when
    /// the delayed one fires. A delay adds no rank edge, so it may close a loop.
    pub fn delay(&self) -> Event<A> {
        let out = EventCore::new(NodeKind::Source, Shape::Stream);
        let subscription = self.core.attach(
            Arc::new(Delay {
                target: Arc::downgrade(&out),
            }),
            Target::Internal,
        );
        out.hold_upstream(subscription);
        Event { core: out }
    }

    /// The behavior's value at each occurrence.
    pub fn snapshot<B: Value>(&self, behavior: &Behavior<B>) -> Event<B> {
        self.snapshot_with(behavior, |_, b| b.clone())
    }

    /// Combine each occurrence with the behavior's value at firing time.
    pub fn snapshot_with<B, C, F>(&self, behavior: &Behavior<B>, f: F) -> Event<C>
    where
        B: Value,
        C: Value,
        F: Fn(&A, &B) -> C + Send + Sync + 'static,
    {
        let behavior = behavior.clone();
        self.derive(Shape::Stream, move |a| Some(f(a, &behavior.sample())))
    }

    /// Pass occurrences only while `predicate` samples `true`.
    pub fn gate(&self, predicate: &Behavior<bool>) -> Event<A> {
        let predicate = predicate.clone();
        self.derive(Shape::Stream, move |a| predicate.sample().then(|| a.clone()))
    }

    /// A behavior holding the latest occurrence, starting at `initial`.
    pub fn hold(&self, initial: A) -> Behavior<A> {
        Behavior::from_updates(self.last_firing_only(), Some(initial))
    }

    /// A behavior folding every occurrence into its state.
    pub fn accum<S, F>(&self, initial: S, fold: F) -> Behavior<S>
    where
        S: Value,
        F: Fn(&A, &S) -> S + Send + Sync + 'static,
    {
        self.collect(initial.clone(), move |a, s| {
            let next = fold(a, s);
            (next.clone(), next)
        })
        .hold(initial)
    }

    /// Emit one output per occurrence while threading hidden state.
    ///
    /// Several occurrences in one transaction fold in arrival order; the
    /// state is committed when the transaction closes.
    pub fn collect<B, S, F>(&self, initial: S, fold: F) -> Event<B>
    where
        B: Value,
        S: Value,
        F: Fn(&A, &S) -> (B, S) + Send + Sync + 'static,
    {
        let state = Arc::new(Mutex::new(Staged::new(initial)));
        self.derive(Shape::Stream, move |a| {
            let txn = Transaction::current_id()?;
            let current = state.lock().latest(txn).clone();
            let (out, next) = fold(a, &current);
            let first = state.lock().stage(txn, next);
            if first {
                let state = state.clone();
                Transaction::defer_commit(move || state.lock().commit(txn));
            }
            Some(out)
        })
    }
}

impl<A: Value> Event<Option<A>> {
    /// Drop `None` occurrences and unwrap the rest.
    pub fn filter_some(&self) -> Event<A> {
        self.derive(Shape::Stream, |a| a.clone())
    }
}
