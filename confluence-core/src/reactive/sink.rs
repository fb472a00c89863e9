//! Sinks
//!
//! Sinks are the entry points from the outside world into the graph. Each
//! `send` is one push wrapped in [`Transaction::run`], so it either opens a
//! transaction of its own or joins the one already active on this thread.

use std::ops::Deref;

use super::behavior::Behavior;
use super::event::{Event, Port};
use super::transaction::Transaction;
use super::Value;
use crate::error::Result;

/// An event that is fired from outside the graph.
pub struct EventSink<A> {
    event: Event<A>,
}

impl<A: Value> EventSink<A> {
    /// Create a sink with no listeners.
    pub fn new() -> Self {
        Self {
            event: Event::source(),
        }
    }

    /// Fire `value`.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from any callback the occurrence reaches.
    pub fn send(&self, value: A) {
        Transaction::run(|| self.event.core.push(Port::Left, value));
    }

    /// Fire `value`, reporting a failed transaction as an error.
    ///
    /// When called inside an active transaction the push simply joins it, and
    /// failures surface at the outer call instead.
    pub fn try_send(&self, value: A) -> Result<()> {
        Transaction::try_run(|| self.event.core.push(Port::Left, value))
    }
}

impl<A: Value> Default for EventSink<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for EventSink<A> {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
        }
    }
}

impl<A> Deref for EventSink<A> {
    type Target = Event<A>;

    fn deref(&self) -> &Event<A> {
        &self.event
    }
}

impl<A> std::fmt::Debug for EventSink<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventSink").field(&self.event).finish()
    }
}

/// A behavior that is set from outside the graph.
pub struct BehaviorSink<A> {
    sink: EventSink<A>,
    behavior: Behavior<A>,
}

impl<A: Value> BehaviorSink<A> {
    /// Create a sink holding `initial` until the first `send` commits.
    pub fn new(initial: A) -> Self {
        let sink = EventSink::new();
        let behavior = sink.hold(initial);
        Self { sink, behavior }
    }

    /// Set a new value, visible once the transaction closes.
    pub fn send(&self, value: A) {
        self.sink.send(value)
    }

    /// Like [`BehaviorSink::send`], reporting a failed transaction as an error.
    pub fn try_send(&self, value: A) -> Result<()> {
        self.sink.try_send(value)
    }
}

impl<A> Clone for BehaviorSink<A> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            behavior: self.behavior.clone(),
        }
    }
}

impl<A> Deref for BehaviorSink<A> {
    type Target = Behavior<A>;

    fn deref(&self) -> &Behavior<A> {
        &self.behavior
    }
}
