use std::collections::BTreeMap;

use shardkv_core::{OpNum, Reply, Request, Upcalls};

/// Single-process stand-in for the RSM: applies operations directly
/// to whatever it wraps, in the order it receives them, with no
/// network transport and no replication. Modeled on the `unreplicated`
/// variant in the original source — "a dummy implementation of the
/// replication interface that just uses a single replica and passes
/// commands directly to it."
///
/// This is not a substitute for a real RSM; it exists so
/// `shardkv-server` and this crate's integration tests have something
/// concrete driving the [`Upcalls`] contract.
pub struct LocalExecutor<U> {
    upcalls: U,
    current: OpNum,
    op_log: BTreeMap<OpNum, Request>,
}

impl<U: Upcalls> LocalExecutor<U> {
    /// Wrap `upcalls`, starting the op-number sequence at zero.
    pub fn new(upcalls: U) -> Self {
        LocalExecutor { upcalls, current: OpNum::ZERO, op_log: BTreeMap::new() }
    }

    /// The op-number of the most recently executed operation.
    pub fn current_opnum(&self) -> OpNum {
        self.current
    }

    /// Execute `request`, returning the op-number it was assigned and
    /// its reply.
    ///
    /// Logged whenever the upcall reports it mutated engine state,
    /// regardless of whether the reply itself reports success: a
    /// rejected OCC `Prepare` still moves its transaction into the
    /// retired list before returning its conflict reply, and that
    /// retirement needs to be undoable by [`Self::rollback_to`] like
    /// any other state change. A failed `Get`/`Put`/unknown-txnid
    /// `Prepare` never touches engine state, so those go unlogged;
    /// `Begin`/`Commit`/`Abort` always mutate.
    pub fn execute(&mut self, request: Request) -> (OpNum, Reply) {
        self.current = self.current.next();
        let (reply_bytes, mutated) = self.upcalls.replica_upcall(self.current, &request);
        let reply = Reply::from_bytes(&reply_bytes).expect("shim reply always decodes");
        if mutated {
            self.op_log.insert(self.current, request);
        }
        (self.current, reply)
    }

    /// Roll back every operation after `target`, then forget them:
    /// they can never be replayed once undone.
    pub fn rollback_to(&mut self, target: OpNum) {
        self.upcalls.rollback_upcall(self.current, target, &self.op_log);
        self.op_log.retain(|&opnum, _| opnum <= target);
        self.current = target;
    }

    /// Declare every operation up to and including `opnum` stable,
    /// and drop the log entries behind it: they can no longer be
    /// rolled back to.
    pub fn commit_through(&mut self, opnum: OpNum) {
        self.upcalls.commit_upcall(opnum);
        self.op_log.retain(|&logged, _| logged > opnum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LockStore, ReplicaShim};
    use shardkv_core::TxnId;

    fn executor() -> LocalExecutor<ReplicaShim> {
        LocalExecutor::new(ReplicaShim::new(Box::new(LockStore::new())))
    }

    fn occ_executor() -> LocalExecutor<ReplicaShim> {
        LocalExecutor::new(ReplicaShim::new(Box::new(crate::OCCStore::new())))
    }

    #[test]
    fn rollback_restores_pre_transaction_state() {
        let mut exec = executor();

        exec.execute(Request::begin(TxnId(1)));
        exec.execute(Request::put(TxnId(1), "k1", "v"));
        exec.execute(Request::prepare(TxnId(1)));
        exec.execute(Request::commit(TxnId(1), "7"));
        assert_eq!(exec.current_opnum(), OpNum(4));

        exec.rollback_to(OpNum::ZERO);
        assert_eq!(exec.current_opnum(), OpNum::ZERO);

        let (_, reply) = exec.execute(Request::get(TxnId(2), "k1"));
        assert!(!reply.is_ok());
    }

    #[test]
    fn rollback_after_a_blocked_put_does_not_panic() {
        // T2's put never acquires the lock (T1 holds it), so it fails
        // and never touches T2's write set. A full rollback, including
        // that failed op's op-number, must not try to undo it.
        let mut exec = executor();

        exec.execute(Request::begin(TxnId(1)));
        exec.execute(Request::put(TxnId(1), "k1", "a"));

        exec.execute(Request::begin(TxnId(2)));
        let (_, blocked) = exec.execute(Request::put(TxnId(2), "k1", "z"));
        assert!(!blocked.is_ok());

        exec.rollback_to(OpNum::ZERO);
        assert_eq!(exec.current_opnum(), OpNum::ZERO);

        let (_, reply) = exec.execute(Request::get(TxnId(3), "k1"));
        assert!(!reply.is_ok());
    }

    #[test]
    fn rollback_spanning_a_conflict_aborted_occ_prepare_does_not_panic() {
        // T1 prepares first and wins; T2's prepare on the same key
        // loses validation, which moves T2 into the retired list as
        // AbortedRunning before the conflict reply is even returned.
        // A rollback all the way back to zero must still undo T1's
        // earlier begin/put/prepare without tripping over T2's
        // conflict-aborted prepare along the way.
        let mut exec = occ_executor();

        exec.execute(Request::begin(TxnId(1)));
        exec.execute(Request::put(TxnId(1), "k1", "a"));
        exec.execute(Request::prepare(TxnId(1)));

        exec.execute(Request::begin(TxnId(2)));
        exec.execute(Request::put(TxnId(2), "k1", "b"));
        let (_, conflict) = exec.execute(Request::prepare(TxnId(2)));
        assert!(!conflict.is_ok());

        exec.rollback_to(OpNum::ZERO);
        assert_eq!(exec.current_opnum(), OpNum::ZERO);

        let (_, reply) = exec.execute(Request::get(TxnId(3), "k1"));
        assert!(!reply.is_ok());
    }

    #[test]
    fn commit_through_prunes_the_log_but_not_engine_state() {
        let mut exec = executor();
        exec.execute(Request::begin(TxnId(1)));
        exec.execute(Request::put(TxnId(1), "k1", "v"));
        exec.execute(Request::prepare(TxnId(1)));
        let (commit_op, _) = exec.execute(Request::commit(TxnId(1), "7"));

        exec.commit_through(commit_op);

        let (_, reply) = exec.execute(Request::get(TxnId(2), "k1"));
        assert_eq!(reply.value, "v");
    }
}
