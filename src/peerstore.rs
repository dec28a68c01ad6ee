use std::{fs, io, path::Path};

use tracing::warn;

use crate::{
    id::raft_node_id_from_ulid,
    raft::types::{NodeId, NodeMeta},
};

/// One known peer, as listed in the peerstore file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub raft_id: NodeId,
    pub node_id: String,
    pub api_base_url: String,
}

impl PeerEntry {
    pub fn node_meta(&self) -> NodeMeta {
        NodeMeta {
            name: String::new(),
            api_base_url: self.api_base_url.clone(),
            raft_endpoint: self.api_base_url.clone(),
        }
    }
}

/// Load the known peers from the peerstore file.
///
/// The format is one peer per line: `<node_ulid> <api_base_url>`. Blank
/// lines and `#` comments are ignored; malformed lines are skipped with a
/// warning. A missing file is an empty peer set.
pub fn load_known_peers(path: &Path) -> io::Result<Vec<PeerEntry>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut peers = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((node_id, api_base_url)) = line.split_once(char::is_whitespace) else {
            warn!(line, "skipping malformed peerstore line");
            continue;
        };
        let api_base_url = api_base_url.trim();
        match raft_node_id_from_ulid(node_id) {
            Ok(raft_id) => peers.push(PeerEntry {
                raft_id,
                node_id: node_id.to_string(),
                api_base_url: api_base_url.to_string(),
            }),
            Err(_) => warn!(line, "skipping peerstore line with invalid node id"),
        }
    }
    Ok(peers)
}
