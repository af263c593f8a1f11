//! Multi-reader, single-writer lock table used by the S2PL backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod server;

pub use server::LockServer;
