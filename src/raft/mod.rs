//! The consensus engine's on-disk snapshot boundary.
//!
//! Only the snapshot file primitives live here. The engine runtime
//! (election, replication, log truncation) belongs to the daemon and is
//! never started by this crate.

pub mod snapshot_store;
pub mod types;

pub use types::{NodeId, NodeMeta};
