use shardkv_core::{OpNum, Timestamp};

/// The monotonic timestamp authority: a single counter behind the RSM
/// substrate, consulted by the client coordinator between Prepare and
/// Commit. No retired list — its undo is pure arithmetic.
pub struct TimestampAuthority {
    ts: u64,
}

impl Default for TimestampAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampAuthority {
    /// A fresh authority starting at zero.
    pub fn new() -> Self {
        TimestampAuthority { ts: 0 }
    }

    /// Issue the next timestamp.
    pub fn replica_upcall(&mut self) -> Timestamp {
        self.ts += 1;
        Timestamp(self.ts)
    }

    /// Undo `undone_ops` previously-issued timestamps, one per
    /// rolled-back operation.
    pub fn rollback_upcall(&mut self, undone_ops: usize) {
        self.ts = self
            .ts
            .checked_sub(undone_ops as u64)
            .expect("rollback_upcall: undone more timestamps than were ever issued");
    }

    /// No-op: the timestamp authority keeps no retired state to compact.
    pub fn commit_upcall(&mut self, _opnum: OpNum) {}

    /// Current counter value (test/introspection only).
    pub fn current(&self) -> u64 {
        self.ts
    }
}
