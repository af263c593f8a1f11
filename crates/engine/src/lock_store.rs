use rustc_hash::FxHashMap;

use shardkv_core::{EngineError, EngineResult, Key, OpNum, Timestamp, TxnId, Value};
use shardkv_lock::LockServer;
use shardkv_storage::VersionedKVStore;

use crate::retired::{Identified, RetiredList, RetiredState};
use crate::txn_store::TxnStore;

struct Transaction {
    id: TxnId,
    read_set: FxHashMap<Key, u32>,
    write_set: FxHashMap<Key, Vec<Value>>,
}

impl Transaction {
    fn new(id: TxnId) -> Self {
        Transaction { id, read_set: FxHashMap::default(), write_set: FxHashMap::default() }
    }
}

impl Identified for Transaction {
    fn id(&self) -> TxnId {
        self.id
    }
}

/// Strict two-phase locking transactional backend.
///
/// Reads and writes take and hold locks (via [`LockServer`]) for the
/// lifetime of the transaction; isolation comes entirely from mutual
/// exclusion, so `prepare` performs no additional validation.
pub struct LockStore {
    store: VersionedKVStore,
    locks: LockServer,
    running: FxHashMap<TxnId, Transaction>,
    prepared: FxHashMap<TxnId, Transaction>,
    retired: RetiredList<Transaction>,
}

impl Default for LockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LockStore {
    /// A fresh backend with an empty store and lock table.
    pub fn new() -> Self {
        LockStore {
            store: VersionedKVStore::new(),
            locks: LockServer::new(),
            running: FxHashMap::default(),
            prepared: FxHashMap::default(),
            retired: RetiredList::new(),
        }
    }

    fn ensure_running(&mut self, id: TxnId) {
        self.running.entry(id).or_insert_with(|| Transaction::new(id));
    }

    fn drop_locks(&mut self, txn: &Transaction) {
        for key in txn.write_set.keys() {
            self.locks.release_for_write(key, txn.id);
        }
        for key in txn.read_set.keys() {
            self.locks.release_for_read(key, txn.id);
        }
    }

    /// Reacquire every lock `txn` held. Only valid during rollback:
    /// sound because no conflicting transaction could have acquired
    /// these locks between this txn's commit/abort and the rollback,
    /// given the single-threaded-RSM-thread invariant (SPEC_FULL.md
    /// section 4.3).
    fn get_locks(&mut self, txn: &Transaction) {
        for key in txn.write_set.keys() {
            let acquired = self.locks.lock_for_write(key, txn.id);
            assert!(acquired, "rollback could not reacquire write lock");
        }
        for key in txn.read_set.keys() {
            let acquired = self.locks.lock_for_read(key, txn.id);
            assert!(acquired, "rollback could not reacquire read lock");
        }
    }
}

impl TxnStore for LockStore {
    fn begin(&mut self, id: TxnId) {
        self.running.insert(id, Transaction::new(id));
    }

    fn unbegin(&mut self, id: TxnId) {
        self.running.remove(&id);
    }

    fn get(&mut self, id: TxnId, key: &[u8]) -> EngineResult<Value> {
        self.ensure_running(id);

        if let Some(value) = self.running[&id].write_set.get(key).and_then(|stack| stack.last()) {
            return Ok(value.clone());
        }

        let (_, value) = self.store.get(key).ok_or(EngineError::NotFound)?;
        let value = value.clone();

        if self.running[&id].read_set.contains_key(key) {
            *self.running.get_mut(&id).unwrap().read_set.get_mut(key).unwrap() += 1;
            Ok(value)
        } else if self.locks.lock_for_read(key, id) {
            self.running.get_mut(&id).unwrap().read_set.insert(key.to_vec(), 1);
            Ok(value)
        } else {
            Err(EngineError::Blocked)
        }
    }

    fn unget(&mut self, id: TxnId, key: &[u8]) {
        let txn = self.running.get_mut(&id).expect("unget: unknown running transaction");
        if let Some(count) = txn.read_set.get_mut(key) {
            if *count > 1 {
                *count -= 1;
            } else {
                txn.read_set.remove(key);
                self.locks.release_for_read(key, id);
            }
        }
        // absent from read_set means the read was served from the
        // write set (a self-read); nothing to undo.
    }

    fn put(&mut self, id: TxnId, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.ensure_running(id);
        if self.locks.lock_for_write(key, id) {
            self.running.get_mut(&id).unwrap().write_set.entry(key.to_vec()).or_default().push(
                value.to_vec(),
            );
            Ok(())
        } else {
            Err(EngineError::Blocked)
        }
    }

    fn unput(&mut self, id: TxnId, key: &[u8], value: &[u8]) {
        let txn = self.running.get_mut(&id).expect("unput: unknown running transaction");
        let stack = txn.write_set.get_mut(key).expect("unput: key not in write set");
        assert_eq!(stack.last().map(Vec::as_slice), Some(value), "unput: value mismatch at tail");
        stack.pop();
        if stack.is_empty() {
            txn.write_set.remove(key);
            self.locks.release_for_write(key, id);
        }
    }

    fn prepare(&mut self, id: TxnId, _op: OpNum) -> EngineResult<()> {
        match self.running.remove(&id) {
            Some(txn) => {
                self.prepared.insert(id, txn);
                Ok(())
            }
            None => Err(EngineError::UnknownTxn(id)),
        }
    }

    fn unprepare(&mut self, id: TxnId, op: OpNum) {
        if let Some(txn) = self.prepared.remove(&id) {
            self.running.insert(id, txn);
        } else {
            let txn = self.retired.pop_expect(op, id, RetiredState::AbortedRunning);
            self.running.insert(id, txn);
        }
    }

    fn commit(&mut self, id: TxnId, ts: Timestamp, op: OpNum) {
        let txn = self.prepared.remove(&id).expect("commit: transaction not prepared");
        for (key, values) in &txn.write_set {
            let value = values.last().expect("write set entry has no values").clone();
            self.store.put(key.clone(), value, ts);
        }
        self.drop_locks(&txn);
        self.retired.push(op, RetiredState::Committed, txn);
    }

    fn uncommit(&mut self, id: TxnId, ts: Timestamp, op: OpNum) {
        let txn = self.retired.pop_expect(op, id, RetiredState::Committed);
        for (key, values) in &txn.write_set {
            let expected = values.last().expect("write set entry has no values");
            let (removed_ts, removed_val) =
                self.store.remove(key).expect("uncommit: version missing from store");
            assert_eq!(removed_ts, ts, "uncommit: timestamp mismatch");
            assert_eq!(&removed_val, expected, "uncommit: value mismatch");
        }
        self.get_locks(&txn);
        assert!(!self.prepared.contains_key(&id), "uncommit: id already prepared");
        self.prepared.insert(id, txn);
    }

    fn abort_txn(&mut self, id: TxnId, op: OpNum) {
        if let Some(txn) = self.running.remove(&id) {
            self.drop_locks(&txn);
            self.retired.push(op, RetiredState::AbortedRunning, txn);
        } else if let Some(txn) = self.prepared.remove(&id) {
            self.drop_locks(&txn);
            self.retired.push(op, RetiredState::AbortedPrepared, txn);
        } else {
            panic!("abortTxn: transaction {id} neither running nor prepared");
        }
    }

    fn unabort(&mut self, id: TxnId, op: OpNum) {
        let (state, txn) = self.retired.pop_expect_one_of(
            op,
            id,
            &[RetiredState::AbortedPrepared, RetiredState::AbortedRunning],
        );
        self.get_locks(&txn);
        match state {
            RetiredState::AbortedPrepared => {
                assert!(!self.prepared.contains_key(&id));
                self.prepared.insert(id, txn);
            }
            RetiredState::AbortedRunning => {
                assert!(!self.running.contains_key(&id));
                self.running.insert(id, txn);
            }
            RetiredState::Committed => unreachable!("pop_expect_one_of enforced the state set"),
        }
    }

    fn spec_commit(&mut self, op: OpNum) {
        self.retired.compact(op);
    }
}
