use std::collections::BTreeMap;

use crate::{OpNum, Request};

/// The RSM's upcall contract, consumed by a shard's replica upcall
/// shim (`shardkv_engine::shim`).
///
/// An RSM is out of scope for this crate (see `SPEC_FULL.md` section
/// 1); this trait is the seam a real one would be wired in through.
/// `shardkv_engine::LocalExecutor` is the in-process stand-in that
/// drives it directly, with no network or consensus involved.
pub trait Upcalls {
    /// Execute one operation, producing its reply bytes and whether it
    /// mutated engine state. The RSM must keep a request around for
    /// rollback whenever this is `true`, even if the reply itself
    /// reports failure: a rejected OCC prepare still moves the
    /// transaction into the retired list, and that retirement needs to
    /// be undoable like any other state change.
    fn replica_upcall(&mut self, opnum: OpNum, request: &Request) -> (Vec<u8>, bool);

    /// Undo every operation with op-number in `(target, current]`,
    /// given the log of previously executed requests keyed by
    /// op-number. Implementations must iterate in descending
    /// op-number order.
    fn rollback_upcall(
        &mut self,
        current: OpNum,
        target: OpNum,
        op_map: &BTreeMap<OpNum, Request>,
    );

    /// Declare every operation with op-number `<= opnum` stable;
    /// implementations may now drop any retired state tagged at or
    /// below it.
    fn commit_upcall(&mut self, opnum: OpNum);
}
