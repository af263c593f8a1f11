//! Shared types for the shardkv transactional key-value store.
//!
//! This crate has no behavior of its own: it defines the id types,
//! wire schema, error taxonomy, and RSM upcall contract that every
//! other `shardkv-*` crate builds on.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod upcall;
mod wire;

pub use error::{EngineError, EngineResult};
pub use ids::{OpNum, Timestamp, TxnId};
pub use upcall::Upcalls;
pub use wire::{Op, Reply, Request};

/// An opaque key. The engine never assumes UTF-8; CLIs and the
/// benchmark client are the only layers that happen to deal in
/// printable strings.
pub type Key = Vec<u8>;

/// An opaque value, same convention as [`Key`].
pub type Value = Vec<u8>;
