use std::sync::mpsc;
use std::thread;

use shardkv_core::{Reply, Request, Upcalls};
use shardkv_engine::LocalExecutor;

use crate::shard_client::ShardClient;

type Job = (Request, Box<dyn FnOnce(Reply) + Send>);

/// A [`ShardClient`] backed by an in-process [`LocalExecutor`], run on
/// a dedicated background thread so the coordinator's synchronous
/// `send`/callback contract holds even though there is no real network
/// hop underneath it.
///
/// Exists for tests and for `shardkv-server`'s single-binary mode; a
/// real deployment would replace this with a transport that talks to
/// a separately-running shard process.
pub struct LocalShardClient {
    jobs: mpsc::Sender<Job>,
}

impl LocalShardClient {
    /// Spawn a worker thread owning `executor`, accepting requests
    /// until this handle (and every clone of its sender) is dropped.
    pub fn spawn<U>(mut executor: LocalExecutor<U>) -> Self
    where
        U: Upcalls + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::spawn(move || {
            for (request, callback) in rx {
                let (_, reply) = executor.execute(request);
                callback(reply);
            }
        });
        LocalShardClient { jobs: tx }
    }
}

impl ShardClient for LocalShardClient {
    fn send(&self, request: Request, callback: Box<dyn FnOnce(Reply) + Send>) {
        self.jobs
            .send((request, callback))
            .unwrap_or_else(|_| panic!("LocalShardClient: worker thread has exited"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardkv_core::TxnId;
    use shardkv_engine::{LockStore, ReplicaShim};
    use std::sync::mpsc as test_mpsc;

    #[test]
    fn dispatches_and_replies_off_thread() {
        let client = LocalShardClient::spawn(LocalExecutor::new(ReplicaShim::new(Box::new(
            LockStore::new(),
        ))));

        let (tx, rx) = test_mpsc::channel();
        client.send(Request::begin(TxnId(1)), Box::new(move |reply| {
            tx.send(reply).unwrap();
        }));
        let reply = rx.recv().unwrap();
        assert!(reply.is_ok());
    }
}
