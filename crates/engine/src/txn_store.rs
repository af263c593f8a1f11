use shardkv_core::{EngineResult, OpNum, Timestamp, TxnId, Value};

/// Common surface the replica upcall shim drives, implemented by both
/// [`crate::LockStore`] and [`crate::OCCStore`].
///
/// A trait object (`Box<dyn TxnStore>`) is used rather than a tagged
/// enum: the two backends' per-transaction state differs enough in
/// shape (lock-carrying read/write sets vs. versioned read sets with
/// no locks at all) that a shared enum payload would force one
/// backend to carry dead fields for the other's shape.
pub trait TxnStore: Send {
    /// Start (or resume, if already present) a running transaction.
    fn begin(&mut self, id: TxnId);
    /// Undo `begin`.
    fn unbegin(&mut self, id: TxnId);

    /// Read `key` within `id`'s transaction.
    fn get(&mut self, id: TxnId, key: &[u8]) -> EngineResult<Value>;
    /// Undo the most recent `get` of `key` within `id`'s transaction.
    fn unget(&mut self, id: TxnId, key: &[u8]);

    /// Write `key = value` within `id`'s transaction.
    fn put(&mut self, id: TxnId, key: &[u8], value: &[u8]) -> EngineResult<()>;
    /// Undo the most recent `put` of `key` within `id`'s transaction.
    fn unput(&mut self, id: TxnId, key: &[u8], value: &[u8]);

    /// Attempt to move `id` from running to prepared.
    fn prepare(&mut self, id: TxnId, op: OpNum) -> EngineResult<()>;
    /// Undo `prepare`.
    fn unprepare(&mut self, id: TxnId, op: OpNum);

    /// Apply `id`'s writes at `ts` and retire it as committed.
    fn commit(&mut self, id: TxnId, ts: Timestamp, op: OpNum);
    /// Undo `commit`.
    fn uncommit(&mut self, id: TxnId, ts: Timestamp, op: OpNum);

    /// Abort `id`, whether running or prepared.
    fn abort_txn(&mut self, id: TxnId, op: OpNum);
    /// Undo `abort_txn`.
    fn unabort(&mut self, id: TxnId, op: OpNum);

    /// Declare every operation `<= op` stable; drop retired state at
    /// or below that op-number.
    fn spec_commit(&mut self, op: OpNum);
}
