use std::collections::VecDeque;

use shardkv_core::{OpNum, TxnId};

/// Disposition of a transaction once it leaves the running/prepared
/// tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetiredState {
    /// Applied to the store.
    Committed,
    /// Aborted after having prepared (locks/validation already held).
    AbortedPrepared,
    /// Aborted while still running (never prepared).
    AbortedRunning,
}

/// Transactions carry their own id for the tail-match assertions
/// `RetiredList::pop_expect` performs.
pub trait Identified {
    /// This transaction's id.
    fn id(&self) -> TxnId;
}

/// Tail-appended, tail-or-head-popped log of retired transactions.
///
/// `push`/`pop_expect` model the undo stack used by `un*` methods
/// (always at the tail, since undo only ever reverses the most recent
/// retirement); `compact` models `specCommit`'s forward-progress
/// reclamation (always at the head, since op-numbers are retired in
/// increasing order).
pub struct RetiredList<T> {
    entries: VecDeque<(OpNum, RetiredState, T)>,
}

impl<T> Default for RetiredList<T> {
    fn default() -> Self {
        RetiredList { entries: VecDeque::new() }
    }
}

impl<T: Identified> RetiredList<T> {
    /// A fresh, empty retired list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `txn` as retired at `op` with the given disposition.
    pub fn push(&mut self, op: OpNum, state: RetiredState, txn: T) {
        self.entries.push_back((op, state, txn));
    }

    /// Pop the tail entry, asserting it matches `(op, id, state)`
    /// exactly. A mismatch means the RSM replayed rollback out of
    /// order with respect to this engine's own log, which is an
    /// engine contract violation and therefore fatal.
    pub fn pop_expect(&mut self, op: OpNum, id: TxnId, state: RetiredState) -> T {
        let (got_op, got_state, txn) =
            self.entries.pop_back().expect("retired list unexpectedly empty during undo");
        assert_eq!(got_op, op, "retired tail op-number mismatch during undo");
        assert_eq!(txn.id(), id, "retired tail txn id mismatch during undo");
        assert_eq!(got_state, state, "retired tail state mismatch during undo");
        txn
    }

    /// Pop the tail entry, asserting its `(op, id)` match and its
    /// state is one of `states`. Returns the matched state alongside
    /// the transaction, for callers (like `unabort`) that restore to
    /// different prior tables depending on which state retired it.
    pub fn pop_expect_one_of(
        &mut self,
        op: OpNum,
        id: TxnId,
        states: &[RetiredState],
    ) -> (RetiredState, T) {
        let (got_op, got_state, txn) =
            self.entries.pop_back().expect("retired list unexpectedly empty during undo");
        assert_eq!(got_op, op, "retired tail op-number mismatch during undo");
        assert_eq!(txn.id(), id, "retired tail txn id mismatch during undo");
        assert!(states.contains(&got_state), "retired tail state not among expected set");
        (got_state, txn)
    }

    /// Drop every entry tagged with an op-number `<= op`: the RSM has
    /// declared those operations permanently stable, so they can
    /// never be undone.
    pub fn compact(&mut self, op: OpNum) {
        while self.entries.front().is_some_and(|(tagged, _, _)| *tagged <= op) {
            self.entries.pop_front();
        }
    }

    /// Number of retained retired entries (test/introspection only).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Txn(u64);

    impl Identified for Txn {
        fn id(&self) -> TxnId {
            TxnId(self.0)
        }
    }

    #[test]
    fn push_then_pop_expect_round_trips() {
        let mut list: RetiredList<Txn> = RetiredList::new();
        list.push(OpNum(1), RetiredState::Committed, Txn(7));
        let txn = list.pop_expect(OpNum(1), TxnId(7), RetiredState::Committed);
        assert_eq!(txn, Txn(7));
        assert!(list.is_empty());
    }

    #[test]
    fn compact_drops_only_entries_at_or_below_watermark() {
        let mut list: RetiredList<Txn> = RetiredList::new();
        list.push(OpNum(1), RetiredState::Committed, Txn(1));
        list.push(OpNum(2), RetiredState::Committed, Txn(2));
        list.push(OpNum(3), RetiredState::Committed, Txn(3));

        list.compact(OpNum(2));

        assert_eq!(list.len(), 1);
        let remaining = list.pop_expect(OpNum(3), TxnId(3), RetiredState::Committed);
        assert_eq!(remaining, Txn(3));
    }

    #[test]
    #[should_panic(expected = "retired tail op-number mismatch")]
    fn pop_expect_panics_on_op_mismatch() {
        let mut list: RetiredList<Txn> = RetiredList::new();
        list.push(OpNum(1), RetiredState::Committed, Txn(7));
        list.pop_expect(OpNum(2), TxnId(7), RetiredState::Committed);
    }
}
