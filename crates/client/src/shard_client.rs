use shardkv_core::{Reply, Request};

/// A handle to one shard (or to the timestamp authority), hiding
/// whatever transport actually carries the request.
///
/// `send` is asynchronous by contract: implementations must not call
/// `callback` before returning, and should invoke it from a thread
/// other than the caller's so [`crate::Coordinator`] can safely hold
/// its state lock across the call without deadlocking against the
/// callback.
pub trait ShardClient: Send + Sync {
    /// Dispatch `request`; eventually invoke `callback` with the reply.
    fn send(&self, request: Request, callback: Box<dyn FnOnce(Reply) + Send>);
}
