//! The cross-shard transaction coordinator: shard routing, the 2PC
//! client protocol (Prepare / fetch-timestamp / Commit), and a
//! [`LocalShardClient`] that drives an in-process [`shardkv_engine::LocalExecutor`]
//! so the coordinator can be exercised without a real network transport.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod coordinator;
mod hash;
mod local;
mod shard_client;

pub use coordinator::Coordinator;
pub use hash::route;
pub use local::LocalShardClient;
pub use shard_client::ShardClient;
