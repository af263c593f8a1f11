use rustc_hash::{FxHashMap, FxHashSet};

use shardkv_core::{EngineError, EngineResult, Key, OpNum, Timestamp, TxnId, Value};
use shardkv_storage::VersionedKVStore;

use crate::retired::{Identified, RetiredList, RetiredState};
use crate::txn_store::TxnStore;

struct Transaction {
    id: TxnId,
    read_set: FxHashMap<Key, (Timestamp, u32)>,
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

/// Optimistic concurrency control transactional backend.
///
/// Reads record the version they observed but take no lock; isolation
/// is enforced entirely at `prepare` time by validating against the
/// store's current versions and the currently-prepared pool.
pub struct OCCStore {
    store: VersionedKVStore,
    running: FxHashMap<TxnId, Transaction>,
    prepared: FxHashMap<TxnId, Transaction>,
    retired: RetiredList<Transaction>,
}

impl Default for OCCStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OCCStore {
    /// A fresh backend with an empty store.
    pub fn new() -> Self {
        OCCStore {
            store: VersionedKVStore::new(),
            running: FxHashMap::default(),
            prepared: FxHashMap::default(),
            retired: RetiredList::new(),
        }
    }

    fn ensure_running(&mut self, id: TxnId) {
        self.running.entry(id).or_insert_with(|| Transaction::new(id));
    }

    /// Union of every key any currently-prepared transaction wrote.
    fn prepared_writes(&self) -> FxHashSet<Key> {
        self.prepared.values().flat_map(|t| t.write_set.keys().cloned()).collect()
    }

    /// Union of every key any currently-prepared transaction read or wrote.
    fn prepared_read_writes(&self) -> FxHashSet<Key> {
        self.prepared
            .values()
            .flat_map(|t| t.write_set.keys().chain(t.read_set.keys()).cloned())
            .collect()
    }
}

impl TxnStore for OCCStore {
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

        if let Some(&(read_ts, _)) = self.running[&id].read_set.get(key) {
            let value = self
                .store
                .get_as_of(key, read_ts)
                .expect("consistent re-read missing its recorded version")
                .clone();
            self.running.get_mut(&id).unwrap().read_set.get_mut(key).unwrap().1 += 1;
            return Ok(value);
        }

        let (ts, value) = self.store.get(key).ok_or(EngineError::NotFound)?;
        let value = value.clone();
        self.running.get_mut(&id).unwrap().read_set.insert(key.to_vec(), (ts, 1));
        Ok(value)
    }

    fn unget(&mut self, id: TxnId, key: &[u8]) {
        let txn = self.running.get_mut(&id).expect("unget: unknown running transaction");
        if let Some((_, count)) = txn.read_set.get_mut(key) {
            if *count > 1 {
                *count -= 1;
            } else {
                txn.read_set.remove(key);
            }
        }
    }

    fn put(&mut self, id: TxnId, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.ensure_running(id);
        self.running.get_mut(&id).unwrap().write_set.entry(key.to_vec()).or_default().push(
            value.to_vec(),
        );
        Ok(())
    }

    fn unput(&mut self, id: TxnId, key: &[u8], value: &[u8]) {
        let txn = self.running.get_mut(&id).expect("unput: unknown running transaction");
        let stack = txn.write_set.get_mut(key).expect("unput: key not in write set");
        assert_eq!(stack.last().map(Vec::as_slice), Some(value), "unput: value mismatch at tail");
        stack.pop();
        if stack.is_empty() {
            txn.write_set.remove(key);
        }
    }

    fn prepare(&mut self, id: TxnId, op: OpNum) -> EngineResult<()> {
        if !self.running.contains_key(&id) {
            return Err(EngineError::UnknownTxn(id));
        }

        let prepared_writes = self.prepared_writes();
        let prepared_read_writes = self.prepared_read_writes();

        let reads: Vec<(Key, Timestamp)> =
            self.running[&id].read_set.iter().map(|(k, &(ts, _))| (k.clone(), ts)).collect();
        for (key, read_ts) in &reads {
            let (cur_ts, _) =
                self.store.get(key).expect("prepare: previously-read key vanished from store");
            if cur_ts != *read_ts || prepared_writes.contains(key.as_slice()) {
                tracing::debug!(?id, ?key, "OCC abort: rw conflict at prepare");
                self.abort_txn(id, op);
                return Err(EngineError::Conflict);
            }
        }

        let writes: Vec<Key> = self.running[&id].write_set.keys().cloned().collect();
        for key in &writes {
            if prepared_read_writes.contains(key.as_slice()) {
                tracing::debug!(?id, ?key, "OCC abort: ww/wr conflict at prepare");
                self.abort_txn(id, op);
                return Err(EngineError::Conflict);
            }
        }

        let txn = self.running.remove(&id).unwrap();
        self.prepared.insert(id, txn);
        Ok(())
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
        assert!(!self.prepared.contains_key(&id), "uncommit: id already prepared");
        self.prepared.insert(id, txn);
    }

    fn abort_txn(&mut self, id: TxnId, op: OpNum) {
        if let Some(txn) = self.running.remove(&id) {
            self.retired.push(op, RetiredState::AbortedRunning, txn);
        } else if let Some(txn) = self.prepared.remove(&id) {
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
