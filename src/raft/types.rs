use serde::{Deserialize, Serialize};

/// Raft node identifier type for this project.
pub type NodeId = u64;

/// Raft node metadata stored in the membership config.
///
/// Local-only metadata (cluster id, certificates) lives in
/// `cluster_metadata`, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    /// A human-friendly node name (optional).
    pub name: String,

    /// The admin/API base URL (used by clients and follower->leader
    /// forwarding).
    pub api_base_url: String,

    /// The Raft RPC endpoint identifier.
    pub raft_endpoint: String,
}
