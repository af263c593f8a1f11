use std::collections::BTreeMap;

use shardkv_core::{EngineError, Op, OpNum, Reply, Request, TxnId, Upcalls};

use crate::txn_store::TxnStore;

/// Converts wire [`Request`]s into calls against a [`TxnStore`] and
/// wire [`Reply`] bytes back, and implements the RSM's
/// [`Upcalls`] contract on top of it.
///
/// Single-threaded with respect to the backend it wraps, matching the
/// RSM's own single-threaded-executor guarantee — no internal locking
/// is needed here or in the backend.
pub struct ReplicaShim {
    store: Box<dyn TxnStore>,
}

impl ReplicaShim {
    /// Wrap `store` behind the upcall contract.
    pub fn new(store: Box<dyn TxnStore>) -> Self {
        ReplicaShim { store }
    }

    fn arg0(request: &Request) -> &str {
        request.arg0.as_deref().unwrap_or_else(|| panic!("{:?} requires arg0", request.op))
    }

    fn arg1(request: &Request) -> &str {
        request.arg1.as_deref().unwrap_or_else(|| panic!("{:?} requires arg1", request.op))
    }

    /// Execute `request`, returning its reply and whether it mutated
    /// engine state.
    ///
    /// `Get`/`Put` never mutate on failure in either backend (both
    /// return before touching any engine state once acquisition or
    /// validation fails), and an unknown-txnid `Prepare` never mutates
    /// either — but an OCC `Prepare` that loses validation already
    /// called `abort_txn` internally (moving the transaction into the
    /// retired list) before returning `Err(Conflict)`. That case must
    /// be reported as mutating so the caller keeps the request around
    /// for `unprepare` to reverse it later.
    fn dispatch(&mut self, opnum: OpNum, request: &Request) -> (Reply, bool) {
        match request.op {
            Op::Begin => {
                self.store.begin(request.txnid);
                (Reply::ok(), true)
            }
            Op::Get => match self.store.get(request.txnid, Self::arg0(request).as_bytes()) {
                Ok(value) => (Reply::ok_value(String::from_utf8_lossy(&value).into_owned()), true),
                Err(e) => (Reply::err(e.wire_status()), false),
            },
            Op::Put => {
                let key = Self::arg0(request).as_bytes();
                let value = Self::arg1(request).as_bytes();
                match self.store.put(request.txnid, key, value) {
                    Ok(()) => (Reply::ok(), true),
                    Err(e) => (Reply::err(e.wire_status()), false),
                }
            }
            Op::Prepare => match self.store.prepare(request.txnid, opnum) {
                Ok(()) => (Reply::ok(), true),
                Err(EngineError::Conflict) => (Reply::err(EngineError::Conflict.wire_status()), true),
                Err(e) => (Reply::err(e.wire_status()), false),
            },
            Op::Commit => {
                let ts = Self::arg0(request)
                    .parse()
                    .unwrap_or_else(|_| panic!("COMMIT arg0 is not a valid timestamp"));
                self.store.commit(request.txnid, ts, opnum);
                (Reply::ok(), true)
            }
            Op::Abort => {
                self.store.abort_txn(request.txnid, opnum);
                (Reply::ok(), true)
            }
        }
    }

    fn undo(&mut self, opnum: OpNum, request: &Request) {
        match request.op {
            Op::Begin => self.store.unbegin(request.txnid),
            Op::Get => self.store.unget(request.txnid, Self::arg0(request).as_bytes()),
            Op::Put => {
                let key = Self::arg0(request).as_bytes();
                let value = Self::arg1(request).as_bytes();
                self.store.unput(request.txnid, key, value);
            }
            Op::Prepare => self.store.unprepare(request.txnid, opnum),
            Op::Commit => {
                let ts = Self::arg0(request)
                    .parse()
                    .unwrap_or_else(|_| panic!("COMMIT arg0 is not a valid timestamp"));
                self.store.uncommit(request.txnid, ts, opnum);
            }
            Op::Abort => self.store.unabort(request.txnid, opnum),
        }
    }

    /// The txnid a request names, for callers that want to log it
    /// without depending on `shardkv_core::Request`'s field layout.
    pub fn txnid_of(request: &Request) -> TxnId {
        request.txnid
    }
}

impl Upcalls for ReplicaShim {
    fn replica_upcall(&mut self, opnum: OpNum, request: &Request) -> (Vec<u8>, bool) {
        tracing::debug!(?opnum, op = ?request.op, txnid = %request.txnid, "replica upcall");
        let (reply, mutated) = self.dispatch(opnum, request);
        (reply.to_bytes().expect("reply always encodes"), mutated)
    }

    fn rollback_upcall(
        &mut self,
        current: OpNum,
        target: OpNum,
        op_map: &BTreeMap<OpNum, Request>,
    ) {
        tracing::debug!(?current, ?target, "rollback upcall");
        for (&opnum, request) in op_map.iter().rev() {
            if opnum > target && opnum <= current {
                self.undo(opnum, request);
            }
        }
    }

    fn commit_upcall(&mut self, opnum: OpNum) {
        tracing::debug!(?opnum, "commit upcall");
        self.store.spec_commit(opnum);
    }
}

/// The timestamp authority's own upcall shim. Unlike [`ReplicaShim`],
/// it ignores the request payload entirely — any request that
/// reaches it means "issue the next timestamp", matching
/// `timeserver.cc`'s `ReplicaUpcall`, which never inspects its input.
pub struct TssShim {
    authority: crate::tss::TimestampAuthority,
}

impl Default for TssShim {
    fn default() -> Self {
        Self::new()
    }
}

impl TssShim {
    /// A fresh timestamp authority shim, counter starting at zero.
    pub fn new() -> Self {
        TssShim { authority: crate::tss::TimestampAuthority::new() }
    }
}

impl Upcalls for TssShim {
    fn replica_upcall(&mut self, _opnum: OpNum, _request: &Request) -> (Vec<u8>, bool) {
        let ts = self.authority.replica_upcall();
        let bytes = Reply::ok_value(ts.to_string()).to_bytes().expect("reply always encodes");
        (bytes, true)
    }

    fn rollback_upcall(
        &mut self,
        current: OpNum,
        target: OpNum,
        op_map: &BTreeMap<OpNum, Request>,
    ) {
        let undone = op_map.keys().filter(|&&opnum| opnum > target && opnum <= current).count();
        self.authority.rollback_upcall(undone);
    }

    fn commit_upcall(&mut self, opnum: OpNum) {
        self.authority.commit_upcall(opnum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LockStore;

    fn req_begin(id: u64) -> Request {
        Request::begin(TxnId(id))
    }

    #[test]
    fn begin_get_put_commit_round_trip_through_the_shim() {
        let mut shim = ReplicaShim::new(Box::new(LockStore::new()));

        let (bytes, mutated) = shim.replica_upcall(OpNum(1), &req_begin(1));
        let reply = Reply::from_bytes(&bytes).unwrap();
        assert!(reply.is_ok());
        assert!(mutated);

        let put = Request::put(TxnId(1), "k1", "v1");
        let (bytes, mutated) = shim.replica_upcall(OpNum(2), &put);
        let reply = Reply::from_bytes(&bytes).unwrap();
        assert!(reply.is_ok());
        assert!(mutated);

        let get = Request::get(TxnId(1), "k1");
        let (bytes, mutated) = shim.replica_upcall(OpNum(3), &get);
        let reply = Reply::from_bytes(&bytes).unwrap();
        assert_eq!(reply.value, "v1");
        assert!(mutated);

        let prepare = Request::prepare(TxnId(1));
        let (bytes, mutated) = shim.replica_upcall(OpNum(4), &prepare);
        let reply = Reply::from_bytes(&bytes).unwrap();
        assert!(reply.is_ok());
        assert!(mutated);

        let commit = Request::commit(TxnId(1), "7");
        let (bytes, mutated) = shim.replica_upcall(OpNum(5), &commit);
        let reply = Reply::from_bytes(&bytes).unwrap();
        assert!(reply.is_ok());
        assert!(mutated);
    }

    #[test]
    fn rollback_undoes_in_descending_order() {
        let mut shim = ReplicaShim::new(Box::new(LockStore::new()));
        let mut log = BTreeMap::new();

        let ops = [
            (OpNum(1), req_begin(1)),
            (OpNum(2), Request::put(TxnId(1), "k1", "v")),
            (OpNum(3), Request::prepare(TxnId(1))),
            (OpNum(4), Request::commit(TxnId(1), "7")),
        ];
        for (opnum, request) in ops {
            shim.replica_upcall(opnum, &request);
            log.insert(opnum, request);
        }

        shim.rollback_upcall(OpNum(4), OpNum(0), &log);

        // after rolling all the way back, a fresh read of k1 must miss.
        let get = Request::get(TxnId(2), "k1");
        let (bytes, _) = shim.replica_upcall(OpNum(5), &get);
        let reply = Reply::from_bytes(&bytes).unwrap();
        assert!(!reply.is_ok());
    }

    #[test]
    fn unprepared_conflict_is_reported_as_mutating() {
        // A rejected OCC prepare has already called abortTxn internally
        // before returning its error; the caller must be told to keep
        // this request around for rollback even though the reply itself
        // reports failure.
        let mut shim = ReplicaShim::new(Box::new(crate::OCCStore::new()));

        shim.replica_upcall(OpNum(1), &req_begin(1));
        shim.replica_upcall(OpNum(2), &Request::put(TxnId(1), "k1", "a"));
        shim.replica_upcall(OpNum(3), &Request::prepare(TxnId(1)));

        shim.replica_upcall(OpNum(4), &req_begin(2));
        shim.replica_upcall(OpNum(5), &Request::put(TxnId(2), "k1", "b"));
        let (bytes, mutated) = shim.replica_upcall(OpNum(6), &Request::prepare(TxnId(2)));
        let reply = Reply::from_bytes(&bytes).unwrap();
        assert!(!reply.is_ok());
        assert!(mutated, "a conflict-aborted prepare must still be logged for rollback");
    }

    #[test]
    fn tss_shim_increments_and_rolls_back() {
        let mut tss_shim = TssShim::new();
        let filler = req_begin(1);

        let (b1, _) = tss_shim.replica_upcall(OpNum(1), &filler);
        let (b2, _) = tss_shim.replica_upcall(OpNum(2), &filler);
        let r1 = Reply::from_bytes(&b1).unwrap();
        let r2 = Reply::from_bytes(&b2).unwrap();
        assert_eq!(r1.value, "1");
        assert_eq!(r2.value, "2");

        let mut log = BTreeMap::new();
        log.insert(OpNum(1), filler.clone());
        log.insert(OpNum(2), filler.clone());
        tss_shim.rollback_upcall(OpNum(2), OpNum(0), &log);

        let (bytes, _) = tss_shim.replica_upcall(OpNum(3), &filler);
        let r3 = Reply::from_bytes(&bytes).unwrap();
        assert_eq!(r3.value, "1");
    }
}
