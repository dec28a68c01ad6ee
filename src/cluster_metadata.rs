use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const CLUSTER_METADATA_SCHEMA_VERSION: u32 = 1;

/// Identity of the local cluster node, written by the daemon at cluster
/// init (`pind init` / `pind join`) and read here so a re-persisted
/// snapshot always names its own node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterMetadata {
    pub schema_version: u32,
    pub cluster_id: String,
    pub node_id: String,
    pub node_name: String,
    pub api_base_url: String,
}

impl ClusterMetadata {
    pub fn metadata_path(data_dir: &Path) -> PathBuf {
        data_dir.join("cluster").join("metadata.json")
    }

    pub fn save(&self, data_dir: &Path) -> anyhow::Result<()> {
        let dir = data_dir.join("cluster");
        fs::create_dir_all(&dir)
            .with_context(|| format!("create cluster dir: {}", dir.display()))?;
        let path = dir.join("metadata.json");
        let bytes = serde_json::to_vec_pretty(self).context("serialize cluster metadata")?;
        write_atomic(&path, &bytes).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn load(data_dir: &Path) -> anyhow::Result<Self> {
        let path = Self::metadata_path(data_dir);
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let meta: Self = serde_json::from_slice(&bytes).context("parse cluster metadata")?;
        if meta.schema_version != CLUSTER_METADATA_SCHEMA_VERSION {
            anyhow::bail!(
                "cluster metadata schema_version mismatch: expected {}, got {}",
                CLUSTER_METADATA_SCHEMA_VERSION,
                meta.schema_version
            );
        }
        Ok(meta)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::id::new_ulid_string;

    fn test_metadata() -> ClusterMetadata {
        ClusterMetadata {
            schema_version: CLUSTER_METADATA_SCHEMA_VERSION,
            cluster_id: new_ulid_string(),
            node_id: new_ulid_string(),
            node_name: "node-1".to_string(),
            api_base_url: "https://127.0.0.1:9097".to_string(),
        }
    }

    #[test]
    fn save_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let meta = test_metadata();
        meta.save(tmp.path()).unwrap();

        let loaded = ClusterMetadata::load(tmp.path()).unwrap();
        assert_eq!(loaded, meta);
    }

    #[test]
    fn load_fails_without_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ClusterMetadata::load(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("metadata.json"));
    }

    #[test]
    fn load_rejects_schema_version_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let mut meta = test_metadata();
        meta.schema_version = 9;
        meta.save(tmp.path()).unwrap();

        let err = ClusterMetadata::load(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("schema_version mismatch"));
    }
}
