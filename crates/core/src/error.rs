use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure kinds surfaced by the transactional backends.
///
/// These are exactly the outcomes a client-visible request can fail
/// with; they map onto the wire reply's `status: i32` at the shim
/// boundary (see `shardkv_engine::shim`). Engine contract violations —
/// undoing an operation the engine has no record of, committing an
/// unprepared txn, a retired-txn tag mismatch — are bugs, not outcomes
/// a caller can react to, and are raised as `assert!`/`expect!` panics
/// at the invariant-check sites directly (`lock_store.rs`,
/// `occ_store.rs`, `retired.rs`) rather than through this enum.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Key absent, or transaction id not known to this shard.
    #[error("not found")]
    NotFound,

    /// Lock unavailable within the wait timeout.
    #[error("blocked")]
    Blocked,

    /// OCC prepare-time validation failed.
    #[error("conflict")]
    Conflict,

    /// `prepare`/`commit`/`abort` referenced a txnid that is not in
    /// the expected state (e.g. a stale or replayed prepare).
    #[error("unknown or misordered transaction: {0}")]
    UnknownTxn(crate::TxnId),
}

impl EngineError {
    /// The wire status code for this error, per the mapping in
    /// `SPEC_FULL.md` section 4.8.
    pub fn wire_status(&self) -> i32 {
        match self {
            EngineError::NotFound => -1,
            EngineError::Blocked => -2,
            EngineError::Conflict => -1,
            EngineError::UnknownTxn(_) => -1,
        }
    }
}
