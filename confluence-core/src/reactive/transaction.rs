//! Transaction Manager
//!
//! A transaction is the unit of atomic propagation. Everything that happens
//! because of one `send` (or one explicit [`Transaction::run`] batch) happens
//! inside a single transaction, and no observer sees the graph half-updated.
//!
//! # How It Works
//!
//! 1. `run` takes the global engine lock. If a transaction is already open on
//!    this thread (a listener calling `send`), the action simply joins it.
//!
//! 2. Otherwise a new transaction is opened, the action runs, and the
//!    transaction closes:
//!    a. pending nodes fire lowest rank first until the queue drains
//!    b. every event loop created in the transaction must be bound
//!    c. deferred "last" actions run in registration order (`switch`
//!       rewiring, user cleanup), repeating a and b if they queue more work
//!    d. staged values are committed (behaviors, `collect` state, `once`)
//!    e. the transaction is cleared, then "post" actions run, each in a
//!       transaction of its own (`delay`)
//!
//! 3. If anything panics or a close check fails before step d, the open
//!    transaction is torn down by a drop guard: queued work is discarded and
//!    the last and commit actions are dropped unrun, so no staged value is
//!    committed.
//!
//! # Thread Safety
//!
//! The engine state lives behind one process-wide re-entrant mutex, held for
//! the whole of a transaction including its posts. Other threads calling
//! `send` or `run` block until it finishes, so two transactions never
//! interleave their rank-ordered processing.

use std::any::Any;
use std::cell::RefCell;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::graph::{Graph, GraphStats, NodeId, RankQueue};

type Action = Box<dyn FnOnce() + Send>;

type EngineGuard = ReentrantMutexGuard<'static, RefCell<Engine>>;

/// Identifies one transaction, used to tag values staged inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TxnId(u64);

impl TxnId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// State of the open transaction.
struct TxnState {
    id: TxnId,
    last: Vec<Action>,
    /// Commits of staged values. Must not call user code.
    commits: Vec<Action>,
    post: Vec<Action>,
    /// Event loops created in this transaction, with their bound flags.
    loops: Vec<(NodeId, Arc<AtomicBool>)>,
    firings: usize,
}

impl TxnState {
    fn new() -> Self {
        Self {
            id: TxnId::next(),
            last: Vec::new(),
            commits: Vec::new(),
            post: Vec::new(),
            loops: Vec::new(),
            firings: 0,
        }
    }
}

/// Everything the global lock protects.
pub(crate) struct Engine {
    pub(crate) graph: Graph,
    queue: RankQueue,
    txn: Option<TxnState>,
    config: EngineConfig,
}

impl Engine {
    fn new() -> Self {
        Self {
            graph: Graph::new(),
            queue: RankQueue::new(),
            txn: None,
            config: EngineConfig::default(),
        }
    }
}

static ENGINE: OnceLock<ReentrantMutex<RefCell<Engine>>> = OnceLock::new();

fn engine() -> &'static ReentrantMutex<RefCell<Engine>> {
    ENGINE.get_or_init(|| ReentrantMutex::new(RefCell::new(Engine::new())))
}

/// Run `f` with exclusive access to the engine.
///
/// `f` must not call back into user code or drop event handles: both may
/// re-enter the engine.
pub(crate) fn with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> R {
    let guard = engine().lock();
    let mut eng = guard.borrow_mut();
    f(&mut eng)
}

/// Like [`with_engine`], but gives up instead of panicking if this thread is
/// already inside the engine. Used from destructors.
pub(crate) fn try_with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> Option<R> {
    let guard = engine().lock();
    let mut eng = guard.try_borrow_mut().ok()?;
    Some(f(&mut eng))
}

/// Entry point for transactions.
///
/// This is a namespace; the transaction itself is global state.
pub struct Transaction;

impl Transaction {
    /// Run `action` inside a transaction and return its result.
    ///
    /// Joins the active transaction when called from inside one.
    ///
    /// # Panics
    ///
    /// Re-raises any panic from a callback after aborting the transaction, and
    /// panics with the error message if closing the transaction detects misuse
    /// (an unbound loop) or runaway propagation. Use [`Transaction::try_run`]
    /// to get those as an [`Error`] instead.
    pub fn run<R>(action: impl FnOnce() -> R) -> R {
        match Self::run_inner(action) {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Run `action` inside a transaction, discarding its result.
    pub fn run_void(action: impl FnOnce()) {
        Self::run(action)
    }

    /// Run `action` inside a transaction, reporting failures as errors.
    ///
    /// A panic raised by `action` or by any callback it triggers becomes
    /// [`Error::Propagation`]. The transaction is aborted in that case and
    /// nothing it staged is committed.
    pub fn try_run<R>(action: impl FnOnce() -> R) -> Result<R> {
        match panic::catch_unwind(AssertUnwindSafe(|| Self::run_inner(action))) {
            Ok(result) => result,
            Err(payload) => Err(Error::Propagation {
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Whether a transaction is open.
    pub fn is_active() -> bool {
        with_engine(|eng| eng.txn.is_some())
    }

    /// Register `action` to run after all rank-ordered propagation of the
    /// current transaction, before it closes.
    ///
    /// Outside a transaction, one is opened just for this action.
    pub fn defer_last(action: impl FnOnce() + Send + 'static) {
        Self::run(|| {
            with_engine(|eng| {
                if let Some(txn) = eng.txn.as_mut() {
                    txn.last.push(Box::new(action));
                }
            })
        })
    }

    /// Install a new engine configuration.
    pub fn configure(config: EngineConfig) {
        tracing::debug!(?config, "engine reconfigured");
        with_engine(|eng| eng.config = config);
    }

    /// The configuration currently in effect.
    pub fn config() -> EngineConfig {
        with_engine(|eng| eng.config.clone())
    }

    /// Counters for the whole graph.
    pub fn stats() -> GraphStats {
        with_engine(|eng| eng.graph.stats())
    }

    /// Register `action` to commit a staged value. Commits run after every
    /// last action has finished, so a failure anywhere before that point
    /// leaves all staged values uncommitted.
    pub(crate) fn defer_commit(action: impl FnOnce() + Send + 'static) {
        Self::run(|| {
            with_engine(|eng| {
                if let Some(txn) = eng.txn.as_mut() {
                    txn.commits.push(Box::new(action));
                }
            })
        })
    }

    /// Register `action` to run once the current transaction has closed.
    pub(crate) fn post(action: impl FnOnce() + Send + 'static) {
        Self::run(|| {
            with_engine(|eng| {
                if let Some(txn) = eng.txn.as_mut() {
                    txn.post.push(Box::new(action));
                }
            })
        })
    }

    /// Queue a node to fire in the current transaction.
    pub(crate) fn schedule(node: NodeId) {
        with_engine(|eng| {
            debug_assert!(eng.txn.is_some(), "node {node} scheduled outside a transaction");
            let rank = eng.graph.rank(node);
            if eng.queue.schedule(node, rank) {
                tracing::trace!(%node, rank = rank.raw(), "scheduled");
            }
        })
    }

    /// The open transaction, if any.
    pub(crate) fn current_id() -> Option<TxnId> {
        with_engine(|eng| eng.txn.as_ref().map(|txn| txn.id))
    }

    /// Require the loop at `node` to be bound before the current transaction
    /// closes. Does nothing outside a transaction.
    pub(crate) fn register_loop(node: NodeId, bound: Arc<AtomicBool>) {
        with_engine(|eng| {
            if let Some(txn) = eng.txn.as_mut() {
                txn.loops.push((node, bound));
            }
        })
    }

    fn run_inner<R>(action: impl FnOnce() -> R) -> Result<R> {
        let guard = engine().lock();
        let opened = {
            let mut eng = guard.borrow_mut();
            if eng.txn.is_some() {
                false
            } else {
                let txn = TxnState::new();
                tracing::debug!(txn = txn.id.0, "transaction opened");
                eng.txn = Some(txn);
                true
            }
        };
        if !opened {
            return Ok(action());
        }

        let mut open = OpenTransaction {
            guard: &guard,
            armed: true,
        };
        let value = action();
        let posts = close(&guard)?;
        open.armed = false;

        for post in posts {
            post();
        }
        Ok(value)
    }
}

/// Fire everything pending, run the last phase, commit, and clear the
/// transaction. Returns the post actions.
fn close(guard: &EngineGuard) -> Result<Vec<Action>> {
    loop {
        propagate(guard)?;
        check_loops(guard)?;

        let last = {
            let mut eng = guard.borrow_mut();
            eng.txn
                .as_mut()
                .map(|txn| mem::take(&mut txn.last))
                .unwrap_or_default()
        };
        if last.is_empty() && guard.borrow().queue.is_empty() {
            break;
        }
        for action in last {
            action();
        }
    }

    let commits = guard
        .borrow_mut()
        .txn
        .as_mut()
        .map(|txn| mem::take(&mut txn.commits))
        .unwrap_or_default();
    for commit in commits {
        commit();
    }

    let finished = guard.borrow_mut().txn.take();
    let Some(finished) = finished else {
        return Ok(Vec::new());
    };
    tracing::debug!(
        txn = finished.id.0,
        firings = finished.firings,
        posts = finished.post.len(),
        "transaction closed"
    );
    Ok(finished.post)
}

/// Pop and fire nodes until the rank queue is empty.
fn propagate(guard: &EngineGuard) -> Result<()> {
    loop {
        let next = {
            let mut eng = guard.borrow_mut();
            let eng = &mut *eng;
            let limit = eng.config.max_firings_per_transaction;
            let Some(node) = eng.queue.pop(&eng.graph) else {
                return Ok(());
            };
            if let Some(txn) = eng.txn.as_mut() {
                txn.firings += 1;
                if txn.firings > limit {
                    // Put it back so the abort clears its inbox.
                    let rank = eng.graph.rank(node);
                    eng.queue.schedule(node, rank);
                    return Err(Error::RunawayPropagation { limit });
                }
            }
            eng.graph.handler(node).map(|handler| (node, handler))
        };

        if let Some((node, handler)) = next {
            tracing::trace!(%node, "firing");
            handler.fire();
        }
    }
}

fn check_loops(guard: &EngineGuard) -> Result<()> {
    let eng = guard.borrow();
    let unbound = eng.txn.as_ref().and_then(|txn| {
        txn.loops
            .iter()
            .find(|(_, bound)| !bound.load(Ordering::SeqCst))
            .map(|(node, _)| *node)
    });
    match unbound {
        Some(node) => Err(Error::LoopUnbound { node }),
        None => Ok(()),
    }
}

/// Aborts the open transaction unless disarmed.
///
/// Mirrors a scope guard: it is dropped on every exit path, including
/// unwinding out of a panicking callback.
struct OpenTransaction<'a> {
    guard: &'a EngineGuard,
    armed: bool,
}

impl Drop for OpenTransaction<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (state, handlers) = {
            let Ok(mut eng) = self.guard.try_borrow_mut() else {
                tracing::warn!("engine busy while aborting a transaction");
                return;
            };
            let eng = &mut *eng;
            let state = eng.txn.take();
            let handlers: Vec<_> = eng
                .queue
                .drain()
                .into_iter()
                .filter_map(|node| eng.graph.handler(node))
                .collect();
            (state, handlers)
        };

        tracing::error!(
            txn = state.as_ref().map(|txn| txn.id.0),
            discarded = handlers.len(),
            "transaction aborted"
        );
        for handler in &handlers {
            handler.discard();
        }
        // Dropped outside the borrow: both may release the last handle to a node.
        drop(handlers);
        drop(state);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_string()
    }
}
