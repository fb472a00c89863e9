//! Transaction-staged state.
//!
//! Behaviors, `collect` and `once` keep a committed value that only changes
//! when a transaction closes. Updates made while propagating go into a working
//! copy tagged with the transaction that made them; the transaction's commit
//! phase promotes it. A working copy left behind by an aborted transaction carries a
//! stale tag and is ignored.

use super::transaction::TxnId;

#[derive(Debug)]
pub(crate) struct Staged<T> {
    committed: T,
    working: Option<(TxnId, T)>,
}

impl<T> Staged<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            committed: value,
            working: None,
        }
    }

    /// The value as of the last successful transaction.
    pub(crate) fn committed(&self) -> &T {
        &self.committed
    }

    /// The value as seen from inside `txn`: its own working copy if it made
    /// one, otherwise the committed value.
    pub(crate) fn latest(&self, txn: TxnId) -> &T {
        match &self.working {
            Some((id, value)) if *id == txn => value,
            _ => &self.committed,
        }
    }

    /// Replace the working copy for `txn`.
    ///
    /// Returns `true` the first time `txn` stages a value, which is when the
    /// caller has to register the commit.
    pub(crate) fn stage(&mut self, txn: TxnId, value: T) -> bool {
        let first = !matches!(&self.working, Some((id, _)) if *id == txn);
        self.working = Some((txn, value));
        first
    }

    /// Promote the working copy staged by `txn`.
    pub(crate) fn commit(&mut self, txn: TxnId) {
        match self.working.take() {
            Some((id, value)) if id == txn => self.committed = value,
            _ => {}
        }
    }

    /// Overwrite the committed value directly, dropping any working copy.
    pub(crate) fn reset(&mut self, value: T) {
        self.committed = value;
        self.working = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::transaction::Transaction;

    fn two_ids() -> (TxnId, TxnId) {
        let first = Transaction::run(Transaction::current_id);
        let second = Transaction::run(Transaction::current_id);
        (first.unwrap(), second.unwrap())
    }

    #[test]
    fn staged_value_is_invisible_until_commit() {
        let (txn, _) = two_ids();
        let mut cell = Staged::new(1);

        assert!(cell.stage(txn, 2));
        assert_eq!(*cell.committed(), 1);
        assert_eq!(*cell.latest(txn), 2);

        cell.commit(txn);
        assert_eq!(*cell.committed(), 2);
    }

    #[test]
    fn restaging_in_same_transaction_is_not_first() {
        let (txn, _) = two_ids();
        let mut cell = Staged::new(0);
        assert!(cell.stage(txn, 1));
        assert!(!cell.stage(txn, 2));
        cell.commit(txn);
        assert_eq!(*cell.committed(), 2);
    }

    #[test]
    fn stale_working_copy_is_ignored() {
        let (aborted, next) = two_ids();
        let mut cell = Staged::new(10);
        cell.stage(aborted, 99);

        // A later transaction does not see the abandoned value.
        assert_eq!(*cell.latest(next), 10);
        assert!(cell.stage(next, 11));
        cell.commit(next);
        assert_eq!(*cell.committed(), 11);
    }

    #[test]
    fn commit_for_another_transaction_discards() {
        let (aborted, next) = two_ids();
        let mut cell = Staged::new(5);
        cell.stage(aborted, 6);
        cell.commit(next);
        assert_eq!(*cell.committed(), 5);
    }

    #[test]
    fn reset_overwrites() {
        let (txn, _) = two_ids();
        let mut cell = Staged::new(None);
        cell.stage(txn, Some(3));
        cell.reset(Some(4));
        assert_eq!(*cell.committed(), Some(4));
        assert_eq!(*cell.latest(txn), Some(4));
    }
}
