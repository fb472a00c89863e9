//! Listener types for the reactive system.
//!
//! A receiver is anything attached to an event that reacts when the event's
//! node fires: a user callback, an inlet feeding a downstream combinator node,
//! a behavior commit, or a delay. A [`Listener`] is the handle that keeps one
//! such attachment alive.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::graph::NodeId;

/// Unique identifier for an attachment.
///
/// Each receiver attached to an event gets a unique ID, used to find it again
/// when the attachment is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that reacts to each occurrence delivered by a firing node.
pub(crate) trait Receiver<A>: Send + Sync {
    fn on_fire(&self, value: &A);
}

/// A user-supplied callback.
pub(crate) struct Callback<F>(pub(crate) F);

impl<A, F> Receiver<A> for Callback<F>
where
    F: Fn(&A) + Send + Sync,
{
    fn on_fire(&self, value: &A) {
        (self.0)(value)
    }
}

/// What an attachment feeds, which decides the graph bookkeeping on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    /// A user callback, counted as a listener on the source node.
    User,
    /// A downstream node, wired as a ranked edge.
    Node(NodeId),
    /// Engine plumbing with no rank edge (behavior commits, delays).
    Internal,
}

/// The side of an attachment that can undo it.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: ListenerId, target: Target);
}

struct Attachment {
    source: Arc<dyn Detach>,
    id: ListenerId,
    target: Target,
}

/// A live subscription.
///
/// Dropping the handle, or calling [`Listener::unlisten`], detaches the
/// callback. The handle also keeps the listened-to event, and everything it
/// is built from, alive.
#[must_use = "dropping a Listener detaches its callback"]
pub struct Listener {
    attachments: SmallVec<[Attachment; 1]>,
}

impl Listener {
    pub(crate) fn new(source: Arc<dyn Detach>, id: ListenerId, target: Target) -> Self {
        let mut attachments = SmallVec::new();
        attachments.push(Attachment { source, id, target });
        Self { attachments }
    }

    /// Detach the callback now.
    pub fn unlisten(self) {
        drop(self)
    }

    /// Combine two listeners into one handle that releases both.
    pub fn append(mut self, mut other: Listener) -> Listener {
        self.attachments.extend(other.attachments.drain(..));
        self
    }

    /// Number of attachments this handle releases.
    pub fn len(&self) -> usize {
        self.attachments.len()
    }

    /// Whether this handle holds no attachment.
    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        for attachment in self.attachments.drain(..) {
            attachment.source.detach(attachment.id, attachment.target);
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field(
                "ids",
                &self.attachments.iter().map(|a| a.id).collect::<Vec<_>>(),
            )
            .finish()
    }
}
