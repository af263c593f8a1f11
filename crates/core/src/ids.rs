use std::fmt;

use serde::{Deserialize, Serialize};

/// A transaction id, chosen by the client. Opaque to the engine beyond
/// equality and ordering (used as a map key and in `RetiredTxn` tags).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An RSM op-number. Assigned by the RSM (or, in this crate's
/// single-process stand-in, by [`shardkv_engine`]'s `LocalExecutor`)
/// and strictly increasing per shard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpNum(pub u64);

impl OpNum {
    /// The op-number preceding the first real operation.
    pub const ZERO: OpNum = OpNum(0);

    /// Next op-number in sequence.
    pub fn next(self) -> OpNum {
        OpNum(self.0 + 1)
    }
}

impl fmt::Display for OpNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A commit timestamp, sourced exclusively from the timestamp
/// authority. Strictly monotonic per key under a non-speculative RSM.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Timestamp {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Timestamp(s.parse()?))
    }
}
