use anyhow::Context;
use ulid::Ulid;

use crate::raft::types::NodeId;

pub fn new_ulid_string() -> String {
    Ulid::new().to_string()
}

/// Derive the Raft node id from a node ULID.
///
/// Uses the low 64 bits (the random component), which is what the cluster
/// daemon registers in the membership config.
pub fn raft_node_id_from_ulid(s: &str) -> anyhow::Result<NodeId> {
    let ulid = Ulid::from_string(s).with_context(|| format!("parse node id as ulid: {s}"))?;
    Ok(ulid.0 as u64)
}
