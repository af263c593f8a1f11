use serde::{Deserialize, Serialize};

use crate::TxnId;

/// Operation codes carried by a [`Request`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Start (or resume) a transaction on this shard.
    Begin,
    /// Read a key. `arg0` is the key.
    Get,
    /// Write a key. `arg0` is the key, `arg1` is the value.
    Put,
    /// Vote on whether this shard can commit `txnid`.
    Prepare,
    /// Finalize `txnid` at the timestamp in `arg0` (decimal).
    Commit,
    /// Roll back `txnid` on this shard.
    Abort,
}

/// A request sent to a shard (or to the timestamp authority, which
/// only ever sees the degenerate `Begin`-less increment path modeled
/// by `shardkv_engine::tss`).
///
/// Fields unused by `op` are `None`, not empty strings: a `Put` always
/// carries `arg1`, a `Get` never does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The requested operation.
    pub op: Op,
    /// The transaction this request belongs to.
    pub txnid: TxnId,
    /// Key (`Get`/`Put`) or commit timestamp as a decimal string (`Commit`).
    pub arg0: Option<String>,
    /// Value (`Put` only).
    pub arg1: Option<String>,
}

impl Request {
    /// Build a `Begin` request.
    pub fn begin(txnid: TxnId) -> Self {
        Request { op: Op::Begin, txnid, arg0: None, arg1: None }
    }

    /// Build a `Get` request for `key`.
    pub fn get(txnid: TxnId, key: impl Into<String>) -> Self {
        Request { op: Op::Get, txnid, arg0: Some(key.into()), arg1: None }
    }

    /// Build a `Put` request for `key`/`value`.
    pub fn put(txnid: TxnId, key: impl Into<String>, value: impl Into<String>) -> Self {
        Request { op: Op::Put, txnid, arg0: Some(key.into()), arg1: Some(value.into()) }
    }

    /// Build a `Prepare` request.
    pub fn prepare(txnid: TxnId) -> Self {
        Request { op: Op::Prepare, txnid, arg0: None, arg1: None }
    }

    /// Build a `Commit` request at the given decimal timestamp.
    pub fn commit(txnid: TxnId, ts: impl Into<String>) -> Self {
        Request { op: Op::Commit, txnid, arg0: Some(ts.into()), arg1: None }
    }

    /// Build an `Abort` request.
    pub fn abort(txnid: TxnId) -> Self {
        Request { op: Op::Abort, txnid, arg0: None, arg1: None }
    }

    /// Encode this request as a MessagePack frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Decode a request previously produced by [`Request::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// The reply to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    /// `>= 0` success, `< 0` failure (see `EngineError::wire_status`).
    pub status: i32,
    /// Populated on a successful `Get`; empty otherwise.
    pub value: String,
}

impl Reply {
    /// A success reply carrying no value (`Begin`/`Put`/`Prepare`/`Commit`/`Abort`).
    pub fn ok() -> Self {
        Reply { status: 0, value: String::new() }
    }

    /// A success reply carrying a `Get` result.
    pub fn ok_value(value: impl Into<String>) -> Self {
        Reply { status: 0, value: value.into() }
    }

    /// A failure reply with the given wire status.
    pub fn err(status: i32) -> Self {
        Reply { status, value: String::new() }
    }

    /// Whether this reply represents success.
    pub fn is_ok(&self) -> bool {
        self.status >= 0
    }

    /// Encode this reply as a MessagePack frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Decode a reply previously produced by [`Reply::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}
