//! Offline operations over the persisted cluster state.
//!
//! Everything here runs against a stopped daemon: the consensus data
//! directory is a single-writer resource and nothing in this module locks
//! it. Callers (the CLI, deployment scripts) are responsible for making
//! sure no daemon is live on the same `--data-dir`.

use std::{
    collections::BTreeMap,
    io::{self, Read, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    cluster_metadata::ClusterMetadata,
    config::Config,
    id::raft_node_id_from_ulid,
    peerstore,
    pin::Pin,
    pin_state::{PinState, SCHEMA_VERSION, StateError},
    raft::{
        snapshot_store::{self, SnapshotPaths, SnapshotStoreError},
        types::{NodeId, NodeMeta},
    },
};

/// Cooperative cancellation flag, flipped by the Ctrl-C handler and
/// checked between stages. The final snapshot write itself is not
/// interruptible.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn bail_if_cancelled(&self) -> Result<(), StateOpsError> {
        if self.is_cancelled() {
            return Err(StateOpsError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum StateOpsError {
    NoSnapshot,
    Cancelled,
    OutdatedState { found: u32, current: u32 },
    CorruptSnapshot { detail: String },
    Store(SnapshotStoreError),
    State(StateError),
    Metadata(anyhow::Error),
    Io(io::Error),
}

impl std::fmt::Display for StateOpsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSnapshot => write!(f, "no snapshot found"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::OutdatedState { found, current } => write!(
                f,
                "outdated state version stored: found {found}, this binary understands {current}"
            ),
            Self::CorruptSnapshot { detail } => {
                write!(f, "snapshot is potentially corrupt: {detail}")
            }
            Self::Store(e) => write!(f, "{e}"),
            Self::State(e) => write!(f, "{e}"),
            Self::Metadata(e) => write!(f, "cluster metadata: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for StateOpsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::State(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Metadata(e) => {
                let source: &(dyn std::error::Error + 'static) = e.as_ref();
                Some(source)
            }
            Self::NoSnapshot
            | Self::Cancelled
            | Self::OutdatedState { .. }
            | Self::CorruptSnapshot { .. } => None,
        }
    }
}

impl From<SnapshotStoreError> for StateOpsError {
    fn from(value: SnapshotStoreError) -> Self {
        Self::Store(value)
    }
}

impl From<StateError> for StateOpsError {
    fn from(value: StateError) -> Self {
        Self::State(value)
    }
}

/// Load the latest snapshot and bring it to the current schema version.
///
/// Returns the state plus `true` when the on-disk encoding was already
/// current. Pure read: nothing is written back, callers decide whether to
/// persist.
pub fn restore(config: &Config, cancel: &CancelToken) -> Result<(PinState, bool), StateOpsError> {
    cancel.bail_if_cancelled()?;

    let snapshot =
        snapshot_store::last_snapshot(&config.data_dir)?.ok_or(StateOpsError::NoSnapshot)?;
    let raw = snapshot.data;

    // One cursor probes the version; migration gets a fresh cursor over
    // the same immutable bytes.
    let mut state = PinState::decode(&raw[..])?;
    if state.schema_version() == SCHEMA_VERSION {
        debug!(pins = state.len(), "snapshot is at the current schema version");
        return Ok((state, true));
    }

    info!(
        found = state.schema_version(),
        current = SCHEMA_VERSION,
        "migrating snapshot state"
    );
    state.migrate(&raw[..])?;
    Ok((state, false))
}

/// Migrate the stored state in place: restore, then persist the upgraded
/// state as a new snapshot. A state that is already current is left
/// untouched.
pub fn upgrade(config: &Config, cancel: &CancelToken) -> Result<(), StateOpsError> {
    let (state, current) = restore(config, cancel)?;
    if current {
        warn!("state is already at the current schema version, nothing to migrate");
        return Ok(());
    }

    cancel.bail_if_cancelled()?;
    persist(config, &state)?;
    info!(pins = state.len(), "migrated state persisted");
    Ok(())
}

/// Write the pin set from the latest snapshot to `w` in the interchange
/// format: a JSON list of pins, 4-space indented.
pub fn export(
    config: &Config,
    w: &mut dyn Write,
    cancel: &CancelToken,
) -> Result<(), StateOpsError> {
    let (state, _) = restore(config, cancel)?;
    cancel.bail_if_cancelled()?;
    export_pins(&state, w)
}

fn export_pins(state: &PinState, w: &mut dyn Write) -> Result<(), StateOpsError> {
    let pins = state.list();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut *w, formatter);
    pins.serialize(&mut ser)
        .map_err(|e| StateOpsError::State(StateError::SerdeJson(e)))?;
    w.write_all(b"\n").map_err(StateOpsError::Io)?;
    Ok(())
}

/// Replace the stored state with the pins read from `r` (interchange
/// format). The first malformed or invalid record aborts the whole import
/// and nothing is persisted.
pub fn import(
    config: &Config,
    r: impl Read,
    cancel: &CancelToken,
) -> Result<(), StateOpsError> {
    cancel.bail_if_cancelled()?;

    let pins: Vec<Pin> =
        serde_json::from_reader(r).map_err(|e| StateOpsError::State(StateError::SerdeJson(e)))?;

    let mut state = PinState::empty();
    for pin in pins {
        state.add(pin)?;
    }

    cancel.bail_if_cancelled()?;
    persist(config, &state)?;
    info!(pins = state.len(), "imported state persisted");
    Ok(())
}

/// Write `state` back as the current consensus snapshot, declaring a
/// membership of every known peer plus this node.
fn persist(config: &Config, state: &PinState) -> Result<(), StateOpsError> {
    let meta = ClusterMetadata::load(&config.data_dir).map_err(StateOpsError::Metadata)?;
    let self_id = raft_node_id_from_ulid(&meta.node_id).map_err(StateOpsError::Metadata)?;

    let peers =
        peerstore::load_known_peers(&config.peerstore_path()).map_err(StateOpsError::Io)?;

    let mut voters: BTreeMap<NodeId, NodeMeta> = BTreeMap::new();
    for peer in &peers {
        voters.insert(peer.raft_id, peer.node_meta());
    }
    // Self goes in last: a snapshot written here must always name its own
    // node, and the local metadata wins over a stale peerstore entry.
    voters.insert(
        self_id,
        NodeMeta {
            name: meta.node_name.clone(),
            api_base_url: meta.api_base_url.clone(),
            raft_endpoint: meta.api_base_url.clone(),
        },
    );

    snapshot_store::save_snapshot(&config.data_dir, state, voters)?;
    Ok(())
}

/// Startup precondition: refuse to run a daemon against a snapshot this
/// binary cannot interpret.
pub fn check(config: &Config) -> Result<(), StateOpsError> {
    let snapshot = match snapshot_store::last_snapshot(&config.data_dir) {
        Ok(None) => {
            debug!("no snapshot on disk, nothing to validate");
            return Ok(());
        }
        Ok(Some(snapshot)) => snapshot,
        Err(e) if e.snapshot_exists() => {
            error!("error reading the latest snapshot; it may be corrupt: {e}");
            return Err(StateOpsError::CorruptSnapshot {
                detail: e.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let state = match PinState::decode(&snapshot.data[..]) {
        Ok(state) => state,
        Err(e) => {
            error!("error decoding the latest snapshot; it may be corrupt: {e}");
            return Err(StateOpsError::CorruptSnapshot {
                detail: e.to_string(),
            });
        }
    };

    if state.schema_version() != SCHEMA_VERSION {
        error!(
            found = state.schema_version(),
            current = SCHEMA_VERSION,
            "an outdated cluster state is saved"
        );
        error!("run `pinctl upgrade` to migrate it to the current version");
        error!("or discard it with `pinctl cleanup`, which archives the consensus data directory");
        return Err(StateOpsError::OutdatedState {
            found: state.schema_version(),
            current: SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Archive the consensus data directory, bounded by `--backups-rotate`.
pub fn cleanup(config: &Config) -> Result<(), StateOpsError> {
    snapshot_store::cleanup_raft(&config.data_dir, config.backups_rotate as usize)?;
    let raft_dir = SnapshotPaths::new(&config.data_dir).raft_dir;
    warn!(
        dir = %raft_dir.display(),
        "consensus data directory rotated; the next start will use an empty state"
    );
    Ok(())
}
