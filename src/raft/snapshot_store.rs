//! File primitives over the consensus data directory.
//!
//! The daemon's Raft state machine persists its current snapshot as a
//! metadata/data file pair under `data_dir/raft/snapshots/`. This module
//! reads and rewrites that pair, and rotates the whole `raft/` directory
//! aside for a clean reset. It never touches the WAL; a daemon resuming
//! from a rewritten snapshot replays nothing past `last_log_id`.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
};

use openraft::{CommittedLeaderId, LogId, Membership, SnapshotMeta, StoredMembership};

use crate::{
    pin_state::{PinState, StateError},
    raft::types::{NodeId, NodeMeta},
};

pub type PinSnapshotMeta = SnapshotMeta<NodeId, NodeMeta>;

#[derive(Debug, Clone)]
pub struct SnapshotPaths {
    pub raft_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub meta_json: PathBuf,
    pub data_json: PathBuf,
}

impl SnapshotPaths {
    pub fn new(data_dir: &Path) -> Self {
        let raft_dir = data_dir.join("raft");
        let snapshot_dir = raft_dir.join("snapshots");
        Self {
            meta_json: snapshot_dir.join("current_meta.json"),
            data_json: snapshot_dir.join("current_snapshot.json"),
            raft_dir,
            snapshot_dir,
        }
    }
}

#[derive(Debug)]
pub enum SnapshotStoreError {
    /// Failure before snapshot existence could be established.
    Io(io::Error),
    ReadMeta { path: PathBuf, source: io::Error },
    DecodeMeta { path: PathBuf, source: serde_json::Error },
    ReadData { path: PathBuf, source: io::Error },
    Write { path: PathBuf, source: io::Error },
    EncodeMeta(serde_json::Error),
    State(StateError),
    NothingToRotate { path: PathBuf },
    Rotate { path: PathBuf, source: io::Error },
}

impl SnapshotStoreError {
    /// True when the failure happened after a snapshot was known to exist,
    /// i.e. the snapshot itself may be corrupt rather than merely absent.
    pub fn snapshot_exists(&self) -> bool {
        matches!(
            self,
            Self::ReadMeta { .. } | Self::DecodeMeta { .. } | Self::ReadData { .. }
        )
    }
}

impl std::fmt::Display for SnapshotStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::ReadMeta { path, source } => {
                write!(f, "read snapshot meta {}: {source}", path.display())
            }
            Self::DecodeMeta { path, source } => {
                write!(f, "decode snapshot meta {}: {source}", path.display())
            }
            Self::ReadData { path, source } => {
                write!(f, "read snapshot data {}: {source}", path.display())
            }
            Self::Write { path, source } => write!(f, "write {}: {source}", path.display()),
            Self::EncodeMeta(e) => write!(f, "encode snapshot meta: {e}"),
            Self::State(e) => write!(f, "{e}"),
            Self::NothingToRotate { path } => {
                write!(f, "nothing to rotate: {} does not exist", path.display())
            }
            Self::Rotate { path, source } => write!(f, "rotate {}: {source}", path.display()),
        }
    }
}

impl std::error::Error for SnapshotStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e)
            | Self::ReadMeta { source: e, .. }
            | Self::ReadData { source: e, .. }
            | Self::Write { source: e, .. }
            | Self::Rotate { source: e, .. } => Some(e),
            Self::DecodeMeta { source: e, .. } => Some(e),
            Self::EncodeMeta(e) => Some(e),
            Self::State(e) => Some(e),
            Self::NothingToRotate { .. } => None,
        }
    }
}

impl From<StateError> for SnapshotStoreError {
    fn from(value: StateError) -> Self {
        Self::State(value)
    }
}

/// The latest snapshot as the consensus engine left it on disk.
#[derive(Debug, Clone)]
pub struct RawSnapshot {
    pub meta: PinSnapshotMeta,
    pub data: Vec<u8>,
}

/// Read the latest snapshot. `Ok(None)` means no snapshot has ever been
/// written; errors from a present-but-unreadable snapshot are
/// distinguishable via [`SnapshotStoreError::snapshot_exists`].
pub fn last_snapshot(data_dir: &Path) -> Result<Option<RawSnapshot>, SnapshotStoreError> {
    let paths = SnapshotPaths::new(data_dir);

    match fs::metadata(&paths.meta_json) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SnapshotStoreError::Io(e)),
        Ok(_) => {}
    }

    let meta_bytes = fs::read(&paths.meta_json).map_err(|e| SnapshotStoreError::ReadMeta {
        path: paths.meta_json.clone(),
        source: e,
    })?;
    let meta: PinSnapshotMeta =
        serde_json::from_slice(&meta_bytes).map_err(|e| SnapshotStoreError::DecodeMeta {
            path: paths.meta_json.clone(),
            source: e,
        })?;
    let data = fs::read(&paths.data_json).map_err(|e| SnapshotStoreError::ReadData {
        path: paths.data_json.clone(),
        source: e,
    })?;

    Ok(Some(RawSnapshot { meta, data }))
}

/// Write `state` as the new current snapshot, declaring `voters` as the
/// single-config membership.
pub fn save_snapshot(
    data_dir: &Path,
    state: &PinState,
    voters: BTreeMap<NodeId, NodeMeta>,
) -> Result<(), SnapshotStoreError> {
    let bytes = state.encode()?;
    save_snapshot_raw(data_dir, &bytes, voters)
}

/// Write raw snapshot bytes. Callers are expected to pass bytes produced
/// by a state encoder; nothing here validates them.
pub fn save_snapshot_raw(
    data_dir: &Path,
    bytes: &[u8],
    voters: BTreeMap<NodeId, NodeMeta>,
) -> Result<(), SnapshotStoreError> {
    let paths = SnapshotPaths::new(data_dir);
    fs::create_dir_all(&paths.snapshot_dir).map_err(|e| SnapshotStoreError::Write {
        path: paths.snapshot_dir.clone(),
        source: e,
    })?;

    let prev_log_id = match last_snapshot(data_dir)? {
        Some(snapshot) => snapshot.meta.last_log_id,
        None => None,
    };
    let last_log_id = next_log_id(prev_log_id, &voters);

    let voter_ids: BTreeSet<NodeId> = voters.keys().copied().collect();
    let membership = Membership::new(vec![voter_ids], voters);
    let meta = PinSnapshotMeta {
        last_log_id: Some(last_log_id),
        last_membership: StoredMembership::new(Some(last_log_id), membership),
        snapshot_id: format!("snapshot-{}", last_log_id.index),
    };

    // Data first; the meta file is the commit point readers look for.
    write_bytes(&paths.data_json, bytes)?;
    let meta_bytes = serde_json::to_vec_pretty(&meta).map_err(SnapshotStoreError::EncodeMeta)?;
    write_bytes(&paths.meta_json, &meta_bytes)?;
    Ok(())
}

/// A rewritten snapshot must supersede the one it replaces on daemon
/// start, so the log index advances by one under the previous leader id.
fn next_log_id(
    prev: Option<LogId<NodeId>>,
    voters: &BTreeMap<NodeId, NodeMeta>,
) -> LogId<NodeId> {
    match prev {
        Some(prev) => LogId::new(prev.leader_id, prev.index + 1),
        None => {
            let first_voter = voters.keys().next().copied().unwrap_or_default();
            LogId::new(CommittedLeaderId::new(1, first_voter), 1)
        }
    }
}

/// Rotate `data_dir/raft` aside as `raft.old.0`, shifting earlier
/// generations up and keeping at most `keep` of them, then recreate an
/// empty `raft/`. Pruning and shifting happen before the active directory
/// is touched, so any failure leaves it intact.
pub fn cleanup_raft(data_dir: &Path, keep: usize) -> Result<(), SnapshotStoreError> {
    let keep = keep.max(1);
    let raft_dir = SnapshotPaths::new(data_dir).raft_dir;
    if !raft_dir.is_dir() {
        return Err(SnapshotStoreError::NothingToRotate { path: raft_dir });
    }

    let generation = |i: usize| data_dir.join(format!("raft.old.{i}"));

    let oldest = generation(keep - 1);
    if oldest.exists() {
        fs::remove_dir_all(&oldest).map_err(|e| SnapshotStoreError::Rotate {
            path: oldest.clone(),
            source: e,
        })?;
    }
    for i in (0..keep.saturating_sub(1)).rev() {
        let from = generation(i);
        if from.exists() {
            let to = generation(i + 1);
            fs::rename(&from, &to).map_err(|e| SnapshotStoreError::Rotate {
                path: from.clone(),
                source: e,
            })?;
        }
    }

    fs::rename(&raft_dir, generation(0)).map_err(|e| SnapshotStoreError::Rotate {
        path: raft_dir.clone(),
        source: e,
    })?;
    fs::create_dir_all(&raft_dir).map_err(|e| SnapshotStoreError::Write {
        path: raft_dir.clone(),
        source: e,
    })?;
    Ok(())
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), SnapshotStoreError> {
    let wrap = |source: io::Error| SnapshotStoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(wrap)?;
    fs::rename(&tmp, path).map_err(wrap)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::pin::Pin;
    use crate::pin_state::SCHEMA_VERSION;

    fn single_voter() -> BTreeMap<NodeId, NodeMeta> {
        let mut voters = BTreeMap::new();
        voters.insert(
            7,
            NodeMeta {
                name: "node-1".to_string(),
                api_base_url: "https://127.0.0.1:9097".to_string(),
                raft_endpoint: "https://127.0.0.1:9097".to_string(),
            },
        );
        voters
    }

    #[test]
    fn last_snapshot_is_none_on_a_fresh_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(last_snapshot(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn save_then_read_roundtrips_state_and_membership() {
        let tmp = tempfile::tempdir().unwrap();
        let mut state = PinState::empty();
        state.add(Pin::everywhere("bafyaaa")).unwrap();

        save_snapshot(tmp.path(), &state, single_voter()).unwrap();

        let snapshot = last_snapshot(tmp.path()).unwrap().unwrap();
        let decoded = PinState::decode(&snapshot.data[..]).unwrap();
        assert_eq!(decoded.schema_version(), SCHEMA_VERSION);
        assert_eq!(decoded.list(), state.list());

        let voters: Vec<NodeId> = snapshot
            .meta
            .last_membership
            .membership()
            .nodes()
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(voters, vec![7]);
        assert_eq!(snapshot.meta.snapshot_id, "snapshot-1");
    }

    #[test]
    fn save_advances_the_snapshot_log_index() {
        let tmp = tempfile::tempdir().unwrap();
        let state = PinState::empty();

        save_snapshot(tmp.path(), &state, single_voter()).unwrap();
        save_snapshot(tmp.path(), &state, single_voter()).unwrap();

        let snapshot = last_snapshot(tmp.path()).unwrap().unwrap();
        assert_eq!(snapshot.meta.last_log_id.unwrap().index, 2);
        assert_eq!(snapshot.meta.snapshot_id, "snapshot-2");
    }

    #[test]
    fn missing_data_file_is_flagged_as_existing_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        save_snapshot(tmp.path(), &PinState::empty(), single_voter()).unwrap();
        fs::remove_file(SnapshotPaths::new(tmp.path()).data_json).unwrap();

        let err = last_snapshot(tmp.path()).unwrap_err();
        assert!(err.snapshot_exists());
        assert!(matches!(err, SnapshotStoreError::ReadData { .. }));
    }

    #[test]
    fn corrupt_meta_is_flagged_as_existing_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        save_snapshot(tmp.path(), &PinState::empty(), single_voter()).unwrap();
        fs::write(SnapshotPaths::new(tmp.path()).meta_json, b"{ truncated").unwrap();

        let err = last_snapshot(tmp.path()).unwrap_err();
        assert!(err.snapshot_exists());
        assert!(matches!(err, SnapshotStoreError::DecodeMeta { .. }));
    }

    #[test]
    fn cleanup_errors_when_there_is_no_raft_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let err = cleanup_raft(tmp.path(), 5).unwrap_err();
        assert!(matches!(err, SnapshotStoreError::NothingToRotate { .. }));
    }

    #[test]
    fn cleanup_rotates_and_bounds_the_generations() {
        let tmp = tempfile::tempdir().unwrap();
        let raft_dir = tmp.path().join("raft");

        for round in 0..4 {
            fs::create_dir_all(&raft_dir).unwrap();
            fs::write(raft_dir.join("marker"), format!("round-{round}")).unwrap();
            cleanup_raft(tmp.path(), 2).unwrap();
        }

        assert!(raft_dir.is_dir());
        assert_eq!(fs::read_dir(&raft_dir).unwrap().count(), 0);

        let newest = fs::read_to_string(tmp.path().join("raft.old.0/marker")).unwrap();
        assert_eq!(newest, "round-3");
        let older = fs::read_to_string(tmp.path().join("raft.old.1/marker")).unwrap();
        assert_eq!(older, "round-2");
        assert!(!tmp.path().join("raft.old.2").exists());
    }

    #[test]
    fn cleanup_failure_leaves_the_active_dir_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let raft_dir = tmp.path().join("raft");
        fs::create_dir_all(&raft_dir).unwrap();
        fs::write(raft_dir.join("marker"), "live").unwrap();
        // A regular file where a generation dir is expected makes the prune
        // step fail before the active directory is touched.
        fs::write(tmp.path().join("raft.old.0"), b"in the way").unwrap();

        let err = cleanup_raft(tmp.path(), 1).unwrap_err();
        assert!(matches!(err, SnapshotStoreError::Rotate { .. }));
        assert_eq!(fs::read_to_string(raft_dir.join("marker")).unwrap(), "live");
    }
}
