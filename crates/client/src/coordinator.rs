use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;

use shardkv_core::{Reply, Request, Timestamp, TxnId};

use crate::hash::route;
use crate::shard_client::ShardClient;

/// Mutable state shared between a coordinator's calling thread and
/// whatever thread(s) a [`ShardClient`] invokes its callbacks from.
/// Exactly one request is ever in flight at a time, since a single
/// `Coordinator` serves one caller sequentially — so `last_reply` is a
/// one-slot mailbox, not a queue.
#[derive(Default)]
struct State {
    /// Every shard this transaction has touched (and therefore sent
    /// `Begin` to); doubles as the commit/abort participant set.
    all_participants: FxHashSet<usize>,
    /// Shards whose `Prepare` vote was yes; `Abort` only needs to
    /// reach these, since a shard that never prepared has nothing to
    /// roll forward.
    yes_participants: FxHashSet<usize>,
    /// Replies received for the request currently outstanding.
    replies: usize,
    /// Replies expected before the request currently outstanding is done.
    expected: usize,
    /// The one-shot reply to a single-shard request (Begin/Get/Put/timestamp fetch).
    last_reply: Option<Reply>,
}

/// Coordinates one client transaction across however many shards its
/// keys land on: routes `Get`/`Put` to the owning shard, lazily sends
/// `Begin` the first time a shard is touched, and drives two-phase
/// commit (`Prepare` on all participants, a timestamp fetch, `Commit`
/// on all participants — or `Abort` on the ones that voted yes) when
/// the caller finishes the transaction.
///
/// One `Coordinator` is good for one transaction at a time; call
/// [`Coordinator::begin`] to reset it and start the next one.
pub struct Coordinator {
    client_id: TxnId,
    n_shards: usize,
    shards: Vec<Arc<dyn ShardClient>>,
    tss: Arc<dyn ShardClient>,
    state: Arc<Mutex<State>>,
    cv: Arc<Condvar>,
}

impl Coordinator {
    /// Build a coordinator for a client identified by `client_id`,
    /// talking to `shards` (indexed by shard number) and `tss` for
    /// commit timestamps.
    pub fn new(client_id: TxnId, shards: Vec<Arc<dyn ShardClient>>, tss: Arc<dyn ShardClient>) -> Self {
        let n_shards = shards.len();
        assert!(n_shards > 0, "Coordinator: at least one shard is required");
        Coordinator {
            client_id,
            n_shards,
            shards,
            tss,
            state: Arc::new(Mutex::new(State::default())),
            cv: Arc::new(Condvar::new()),
        }
    }

    /// Start a new transaction: forgets every participant and vote
    /// from whatever transaction ran before. No I/O — matches the
    /// shard-side `Begin`, which isn't sent until a shard is actually
    /// touched.
    pub fn begin(&self) {
        *self.state.lock() = State::default();
    }

    /// Read `key`. Returns `None` if the shard that owns it reports
    /// the key absent.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let shard = route(key, self.n_shards);
        self.ensure_participant(shard);
        let request = Request::get(self.client_id, String::from_utf8_lossy(key).into_owned());
        let reply = self.single_request(shard, request);
        if reply.is_ok() {
            Some(reply.value.into_bytes())
        } else {
            None
        }
    }

    /// Write `key = value`. Blocks are surfaced as a no-op rather than
    /// a panic: the caller sees the effect of `commit` returning
    /// `false`, just as a real deployment would after a conflicting
    /// transaction wins the lock or OCC race.
    pub fn put(&self, key: &[u8], value: &[u8]) {
        let shard = route(key, self.n_shards);
        self.ensure_participant(shard);
        let request = Request::put(
            self.client_id,
            String::from_utf8_lossy(key).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        );
        let reply = self.single_request(shard, request);
        if !reply.is_ok() {
            tracing::warn!(shard, status = reply.status, "put rejected by shard");
        }
    }

    /// Run two-phase commit across every participant touched since
    /// the last `begin`. Returns `true` iff every participant voted
    /// yes and the transaction committed; otherwise the transaction
    /// has already been aborted on every shard that voted yes.
    pub fn commit(&self) -> bool {
        let participants: Vec<usize> = {
            let state = self.state.lock();
            state.all_participants.iter().copied().collect()
        };
        if participants.is_empty() {
            return true;
        }

        if !self.do_prepare(&participants) {
            self.abort();
            return false;
        }

        let ts = self.fetch_timestamp();
        self.do_commit(&participants, ts);
        true
    }

    /// Abort the current transaction on every shard that had voted
    /// yes to `Prepare` (shards that never prepared have no state to
    /// unwind). A no-op if `commit`/`get`/`put` were never called.
    pub fn abort(&self) {
        let yes: Vec<usize> = {
            let state = self.state.lock();
            state.yes_participants.iter().copied().collect()
        };
        if yes.is_empty() {
            return;
        }
        self.do_abort(&yes);
    }

    fn ensure_participant(&self, shard: usize) {
        let first_touch = {
            let mut state = self.state.lock();
            state.all_participants.insert(shard)
        };
        if first_touch {
            self.single_request(shard, Request::begin(self.client_id));
        }
    }

    /// Send one request to one shard and block until its reply
    /// arrives. Used for `Begin`/`Get`/`Put`, all of which only ever
    /// address a single participant.
    fn single_request(&self, shard: usize, request: Request) -> Reply {
        let target = Arc::clone(&self.shards[shard]);
        self.single_request_to(&target, request)
    }

    /// Phase 1: fan `Prepare` out to every participant and wait for
    /// all votes. Returns whether every participant voted yes.
    fn do_prepare(&self, participants: &[usize]) -> bool {
        {
            let mut state = self.state.lock();
            state.replies = 0;
            state.expected = participants.len();
            state.yes_participants.clear();
        }

        for &shard in participants {
            let state = Arc::clone(&self.state);
            let cv = Arc::clone(&self.cv);
            self.shards[shard].send(
                Request::prepare(self.client_id),
                Box::new(move |reply| {
                    let mut guard = state.lock();
                    if reply.is_ok() {
                        guard.yes_participants.insert(shard);
                    }
                    guard.replies += 1;
                    cv.notify_all();
                }),
            );
        }

        let mut guard = self.state.lock();
        while guard.replies < guard.expected {
            self.cv.wait(&mut guard);
        }
        guard.yes_participants.len() == participants.len()
    }

    /// Phase 2a: ask the timestamp authority for the commit timestamp.
    /// The request content is irrelevant; the TSS shim ignores it and
    /// always returns the next counter value, so `Begin` is reused
    /// purely as a harmless filler payload.
    fn fetch_timestamp(&self) -> Timestamp {
        let reply = self.single_request_to(&self.tss, Request::begin(self.client_id));
        reply.value.parse().expect("timestamp authority returned a non-numeric reply")
    }

    fn single_request_to(&self, target: &Arc<dyn ShardClient>, request: Request) -> Reply {
        {
            let mut state = self.state.lock();
            state.replies = 0;
            state.expected = 1;
            state.last_reply = None;
        }

        let state = Arc::clone(&self.state);
        let cv = Arc::clone(&self.cv);
        target.send(
            request,
            Box::new(move |reply| {
                let mut guard = state.lock();
                guard.last_reply = Some(reply);
                guard.replies += 1;
                cv.notify_all();
            }),
        );

        let mut guard = self.state.lock();
        while guard.replies < guard.expected {
            self.cv.wait(&mut guard);
        }
        guard.last_reply.take().expect("single_request_to: reply slot empty after wait")
    }

    /// Phase 2b: fan `Commit` out to every participant and wait for
    /// all acknowledgements. Commit cannot fail once every participant
    /// has voted yes, so replies are only waited on, not inspected.
    fn do_commit(&self, participants: &[usize], ts: Timestamp) {
        {
            let mut state = self.state.lock();
            state.replies = 0;
            state.expected = participants.len();
        }

        for &shard in participants {
            let state = Arc::clone(&self.state);
            let cv = Arc::clone(&self.cv);
            self.shards[shard].send(
                Request::commit(self.client_id, ts.to_string()),
                Box::new(move |_reply| {
                    let mut guard = state.lock();
                    guard.replies += 1;
                    cv.notify_all();
                }),
            );
        }

        let mut guard = self.state.lock();
        while guard.replies < guard.expected {
            self.cv.wait(&mut guard);
        }
    }

    fn do_abort(&self, yes_participants: &[usize]) {
        {
            let mut state = self.state.lock();
            state.replies = 0;
            state.expected = yes_participants.len();
        }

        for &shard in yes_participants {
            let state = Arc::clone(&self.state);
            let cv = Arc::clone(&self.cv);
            self.shards[shard].send(
                Request::abort(self.client_id),
                Box::new(move |_reply| {
                    let mut guard = state.lock();
                    guard.replies += 1;
                    cv.notify_all();
                }),
            );
        }

        let mut guard = self.state.lock();
        while guard.replies < guard.expected {
            self.cv.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalShardClient;
    use shardkv_engine::{LocalExecutor, LockStore, OCCStore, ReplicaShim, TssShim};

    fn make_coordinator(n_shards: usize) -> Coordinator {
        let shards: Vec<Arc<dyn ShardClient>> = (0..n_shards)
            .map(|_| {
                let exec = LocalExecutor::new(ReplicaShim::new(Box::new(LockStore::new())));
                Arc::new(LocalShardClient::spawn(exec)) as Arc<dyn ShardClient>
            })
            .collect();
        let tss: Arc<dyn ShardClient> =
            Arc::new(LocalShardClient::spawn(LocalExecutor::new(TssShim::new())));
        Coordinator::new(TxnId(1), shards, tss)
    }

    #[test]
    fn single_shard_put_then_commit_then_read_back() {
        let coord = make_coordinator(4);

        coord.begin();
        coord.put(b"hello", b"world");
        assert!(coord.commit());

        coord.begin();
        assert_eq!(coord.get(b"hello"), Some(b"world".to_vec()));
    }

    #[test]
    fn aborted_transaction_leaves_no_trace() {
        let coord = make_coordinator(4);

        coord.begin();
        coord.put(b"hello", b"world");
        coord.abort();

        coord.begin();
        assert_eq!(coord.get(b"hello"), None);
    }

    #[test]
    fn multi_shard_commit_touches_every_participant() {
        let coord = make_coordinator(4);

        coord.begin();
        // pick a handful of keys likely to land on different shards.
        for (k, v) in [("a", "1"), ("bb", "2"), ("ccc", "3"), ("dddd", "4")] {
            coord.put(k.as_bytes(), v.as_bytes());
        }
        assert!(coord.commit());

        coord.begin();
        for (k, v) in [("a", "1"), ("bb", "2"), ("ccc", "3"), ("dddd", "4")] {
            assert_eq!(coord.get(k.as_bytes()), Some(v.as_bytes().to_vec()));
        }
    }

    #[test]
    fn commit_with_no_participants_is_trivially_true() {
        let coord = make_coordinator(2);
        coord.begin();
        assert!(coord.commit());
    }

    /// Two coordinators touching different shards, one of which has a
    /// stale read on the shard the other just advanced: its `Prepare`
    /// loses on that shard and its `Commit` returns `false`, but the
    /// shard it *did* win a yes-vote on still gets an explicit `Abort`
    /// rolling back its prepared write, while the shard that rejected
    /// the prepare keeps the winner's committed value untouched.
    #[test]
    fn losing_coordinators_conflict_is_scoped_to_its_own_shard() {
        let shards: Vec<Arc<dyn ShardClient>> = (0..2)
            .map(|_| {
                let exec = LocalExecutor::new(ReplicaShim::new(Box::new(OCCStore::new())));
                Arc::new(LocalShardClient::spawn(exec)) as Arc<dyn ShardClient>
            })
            .collect();
        let tss: Arc<dyn ShardClient> =
            Arc::new(LocalShardClient::spawn(LocalExecutor::new(TssShim::new())));

        let shard_a = route(b"k_a", shards.len());
        let shard_b = route(b"k_b", shards.len());
        assert_ne!(shard_a, shard_b, "keys must land on distinct shards for this scenario");

        let t1 = Coordinator::new(TxnId(1), shards.clone(), Arc::clone(&tss));
        let t2 = Coordinator::new(TxnId(2), shards.clone(), tss);

        // Establish an initial committed version of k_a for T2 to read.
        t1.begin();
        t1.put(b"k_a", b"zero");
        assert!(t1.commit());

        // T2 reads k_a (recording that version) and writes an
        // unrelated key on the other shard.
        t2.begin();
        assert_eq!(t2.get(b"k_a"), Some(b"zero".to_vec()));
        t2.put(b"k_b", b"untouched");

        // T1 advances k_a to a newer version while T2 is still open,
        // making T2's recorded read stale.
        t1.begin();
        t1.put(b"k_a", b"one");
        assert!(t1.commit());

        // T2's prepare on shard_a rejects the stale read, so its
        // overall commit fails; only shard_b (which voted yes) needs
        // an explicit Abort to unwind its prepared write.
        assert!(!t2.commit());

        t1.begin();
        assert_eq!(t1.get(b"k_a"), Some(b"one".to_vec()));
        assert_eq!(t1.get(b"k_b"), None);
    }
}
