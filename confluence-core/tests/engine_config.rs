//! Engine Configuration and Statistics Tests
//!
//! The engine is process-wide, so these live in their own test binary: a
//! lowered firing limit must not leak into the transactions of unrelated
//! tests.

use confluence_core::{EngineConfig, Error, EventSink, GraphStats, Transaction};

/// Test that an installed firing limit is the one enforced.
#[test]
fn configured_limit_stops_runaway_propagation() {
    Transaction::configure(EngineConfig {
        max_firings_per_transaction: 10,
    });
    assert_eq!(Transaction::config().max_firings_per_transaction, 10);

    let e = EventSink::<u64>::new();
    let feedback = e.clone();
    let _l = e.listen(move |n| feedback.send(n + 1));
    let result = Transaction::try_run(|| e.send(0));

    Transaction::configure(EngineConfig::default());

    assert_eq!(result, Err(Error::RunawayPropagation { limit: 10 }));
    assert_eq!(Transaction::config(), EngineConfig::default());
}

/// Test that stats track nodes, edges and listeners as a chain is built and
/// dropped.
#[test]
fn stats_follow_graph_changes() {
    let delta = |before: GraphStats, after: GraphStats| {
        (
            after.nodes - before.nodes,
            after.edges - before.edges,
            after.listeners - before.listeners,
        )
    };

    // Holding the transaction keeps other threads from touching the graph.
    Transaction::run(|| {
        let before = Transaction::stats();

        let e = EventSink::<i32>::new();
        let doubled = e.map(|x| x * 2);
        let listener = doubled.listen(|_| {});
        assert_eq!(delta(before, Transaction::stats()), (2, 1, 1));

        drop(listener);
        assert_eq!(delta(before, Transaction::stats()), (2, 1, 0));

        drop(doubled);
        assert_eq!(delta(before, Transaction::stats()), (1, 0, 0));

        drop(e);
        assert_eq!(Transaction::stats(), before);
    });
}
