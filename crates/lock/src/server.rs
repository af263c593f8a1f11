use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;
use shardkv_core::TxnId;

const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Unlocked,
    LockedForRead,
    LockedForWrite,
    LockedForReadWrite,
}

struct Waiter {
    write: bool,
    enqueued_at: Instant,
}

#[derive(Default)]
struct Lock {
    state_storage: Option<LockState>,
    read_holders: FxHashSet<TxnId>,
    write_holder: Option<TxnId>,
    wait_queue: VecDeque<TxnId>,
    waiters: HashMap<TxnId, Waiter>,
}

impl Lock {
    fn state(&self) -> LockState {
        self.state_storage.unwrap_or(LockState::Unlocked)
    }

    fn recompute_state(&mut self) {
        self.state_storage = Some(match (self.write_holder, self.read_holders.is_empty()) {
            (Some(_), false) => LockState::LockedForReadWrite,
            (Some(_), true) => LockState::LockedForWrite,
            (None, false) => LockState::LockedForRead,
            (None, true) => LockState::Unlocked,
        });
    }

    fn is_write_next(&self) -> bool {
        match self.wait_queue.front() {
            Some(tid) => self.waiters.get(tid).map(|w| w.write).unwrap_or(false),
            None => false,
        }
    }

    fn can_acquire(&self, requester: TxnId, write: bool) -> bool {
        match self.state() {
            LockState::Unlocked => true,
            LockState::LockedForRead => {
                if write {
                    self.read_holders.len() == 1 && self.read_holders.contains(&requester)
                } else {
                    !(self.is_write_next() && self.wait_queue.front() != Some(&requester))
                }
            }
            LockState::LockedForWrite => self.write_holder == Some(requester),
            LockState::LockedForReadWrite => self.write_holder == Some(requester),
        }
    }

    fn apply_acquire(&mut self, requester: TxnId, write: bool) {
        if write {
            self.write_holder = Some(requester);
        } else {
            self.read_holders.insert(requester);
        }
        self.waiters.remove(&requester);
        self.wait_queue.retain(|&tid| tid != requester);
        self.recompute_state();
    }

    fn forget_waiter(&mut self, requester: TxnId) {
        self.waiters.remove(&requester);
        self.wait_queue.retain(|&tid| tid != requester);
    }

    fn is_idle(&self) -> bool {
        self.state() == LockState::Unlocked && self.waiters.is_empty()
    }
}

/// Per-key multi-reader/single-writer lock table with a bounded wait,
/// reentrant upgrade for a single holder, and best-effort
/// writer-favoring fairness.
///
/// Acquisitions block the calling thread (polling at a short interval)
/// until they succeed or [`LOCK_WAIT_TIMEOUT`] elapses; this mirrors
/// the blocking `lockForRead`/`lockForWrite` calls the S2PL backend
/// makes directly from its single-threaded executor.
pub struct LockServer {
    locks: HashMap<Vec<u8>, Lock>,
    timeout: Duration,
}

impl Default for LockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl LockServer {
    /// A lock table with the standard five-second wait timeout.
    pub fn new() -> Self {
        LockServer { locks: HashMap::new(), timeout: LOCK_WAIT_TIMEOUT }
    }

    /// A lock table with a caller-specified wait timeout, for tests
    /// that need to observe a timeout without actually waiting 5s.
    pub fn with_timeout(timeout: Duration) -> Self {
        LockServer { locks: HashMap::new(), timeout }
    }

    /// Acquire a read lock on `key` for `requester`, blocking up to
    /// the configured timeout.
    pub fn lock_for_read(&mut self, key: &[u8], requester: TxnId) -> bool {
        self.acquire(key, requester, false)
    }

    /// Acquire a write lock on `key` for `requester`, blocking up to
    /// the configured timeout.
    pub fn lock_for_write(&mut self, key: &[u8], requester: TxnId) -> bool {
        self.acquire(key, requester, true)
    }

    fn acquire(&mut self, key: &[u8], requester: TxnId, write: bool) -> bool {
        let deadline = Instant::now() + self.timeout;
        loop {
            let lock = self.locks.entry(key.to_vec()).or_default();
            if lock.can_acquire(requester, write) {
                lock.apply_acquire(requester, write);
                return true;
            }
            if !lock.waiters.contains_key(&requester) {
                lock.waiters.insert(requester, Waiter { write, enqueued_at: Instant::now() });
                lock.wait_queue.push_back(requester);
            }
            if Instant::now() >= deadline {
                lock.forget_waiter(requester);
                if lock.is_idle() {
                    self.locks.remove(key);
                }
                tracing::warn!(?requester, write, "lock wait timed out");
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Release a read reference on `key` held by `holder`.
    pub fn release_for_read(&mut self, key: &[u8], holder: TxnId) {
        let Some(lock) = self.locks.get_mut(key) else { return };
        lock.read_holders.remove(&holder);
        lock.recompute_state();
        if lock.is_idle() {
            self.locks.remove(key);
        }
    }

    /// Release the write reference on `key` held by `holder`.
    pub fn release_for_write(&mut self, key: &[u8], holder: TxnId) {
        let Some(lock) = self.locks.get_mut(key) else { return };
        if lock.write_holder == Some(holder) {
            lock.write_holder = None;
        }
        lock.recompute_state();
        if lock.is_idle() {
            self.locks.remove(key);
        }
    }
}
