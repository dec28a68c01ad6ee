use std::{
    collections::BTreeMap,
    io::{self, Read},
};

use serde::{Deserialize, Serialize};

use crate::pin::{Pin, PinError};

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug)]
pub enum StateError {
    Io(io::Error),
    SerdeJson(serde_json::Error),
    Pin(PinError),
    SchemaVersionMismatch { expected: u32, got: u32 },
    UnknownSchemaVersion { got: u32 },
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::SerdeJson(e) => write!(f, "json error: {e}"),
            Self::Pin(e) => write!(f, "{e}"),
            Self::SchemaVersionMismatch { expected, got } => {
                write!(f, "schema_version mismatch: expected {expected}, got {got}")
            }
            Self::UnknownSchemaVersion { got } => {
                write!(
                    f,
                    "unknown schema_version {got}: no migration path to version {SCHEMA_VERSION}"
                )
            }
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::SerdeJson(e) => Some(e),
            Self::Pin(e) => Some(e),
            Self::SchemaVersionMismatch { .. } | Self::UnknownSchemaVersion { .. } => None,
        }
    }
}

impl From<io::Error> for StateError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StateError {
    fn from(value: serde_json::Error) -> Self {
        Self::SerdeJson(value)
    }
}

impl From<PinError> for StateError {
    fn from(value: PinError) -> Self {
        Self::Pin(value)
    }
}

#[derive(Debug, Deserialize)]
struct VersionProbe {
    schema_version: u32,
}

#[derive(Debug, Deserialize)]
struct PersistedPins {
    schema_version: u32,
    #[serde(default)]
    pins: BTreeMap<String, Pin>,
}

#[derive(Serialize)]
struct PersistedPinsRef<'a> {
    schema_version: u32,
    pins: &'a BTreeMap<String, Pin>,
}

/// Legacy v1 pin shape: a single replication factor, no name.
#[derive(Debug, Deserialize)]
struct PinV1 {
    replication: i64,
    #[serde(default)]
    allocations: Vec<String>,
}

impl PinV1 {
    fn into_pin(self, cid: String) -> Pin {
        Pin {
            cid,
            name: String::new(),
            replication_factor_min: self.replication,
            replication_factor_max: self.replication,
            allocations: self.allocations,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PersistedPinsV1 {
    #[serde(default)]
    pins: BTreeMap<String, PinV1>,
}

/// The versioned in-memory pin set.
///
/// A freshly decoded state may carry an older schema version; everything
/// else in the crate only ever sees the current version, which `encode`
/// enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinState {
    version: u32,
    pins: BTreeMap<String, Pin>,
}

impl PinState {
    pub fn empty() -> Self {
        Self {
            version: SCHEMA_VERSION,
            pins: BTreeMap::new(),
        }
    }

    /// Decode raw snapshot bytes with the current decoder.
    ///
    /// Bytes at another schema version decode to an empty state that only
    /// reports its version; `migrate` re-reads the same bytes with the
    /// version-specific rules.
    pub fn decode(mut r: impl Read) -> Result<Self, StateError> {
        let mut raw = Vec::new();
        r.read_to_end(&mut raw)?;

        let probe: VersionProbe = serde_json::from_slice(&raw)?;
        if probe.schema_version != SCHEMA_VERSION {
            return Ok(Self {
                version: probe.schema_version,
                pins: BTreeMap::new(),
            });
        }

        let persisted: PersistedPins = serde_json::from_slice(&raw)?;
        Ok(Self {
            version: persisted.schema_version,
            pins: persisted.pins,
        })
    }

    pub fn schema_version(&self) -> u32 {
        self.version
    }

    /// Upgrade this state to the current schema version.
    ///
    /// `r` must be a fresh cursor over the same bytes `decode` saw. Steps
    /// run one version at a time until the state is current, so a chain of
    /// historical versions only needs a step per hop.
    pub fn migrate(&mut self, mut r: impl Read) -> Result<(), StateError> {
        let mut raw = Vec::new();
        r.read_to_end(&mut raw)?;

        while self.version != SCHEMA_VERSION {
            match self.version {
                1 => self.migrate_from_v1(&raw)?,
                got => return Err(StateError::UnknownSchemaVersion { got }),
            }
        }
        Ok(())
    }

    fn migrate_from_v1(&mut self, raw: &[u8]) -> Result<(), StateError> {
        let old: PersistedPinsV1 = serde_json::from_slice(raw)?;
        self.pins = old
            .pins
            .into_iter()
            .map(|(cid, pin)| {
                let pin = pin.into_pin(cid.clone());
                (cid, pin)
            })
            .collect();
        self.version = 2;
        Ok(())
    }

    /// Add one pin. A pin with an already-tracked cid replaces the old
    /// entry (last write wins).
    pub fn add(&mut self, pin: Pin) -> Result<(), StateError> {
        pin.validate()?;
        self.pins.insert(pin.cid.clone(), pin);
        Ok(())
    }

    /// All pins, in cid order.
    pub fn list(&self) -> Vec<Pin> {
        self.pins.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Encode as raw snapshot bytes. Refuses a state that is not at the
    /// current schema version; only `migrate` may hold such a state.
    pub fn encode(&self) -> Result<Vec<u8>, StateError> {
        if self.version != SCHEMA_VERSION {
            return Err(StateError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                got: self.version,
            });
        }
        let persisted = PersistedPinsRef {
            schema_version: self.version,
            pins: &self.pins,
        };
        let mut bytes = serde_json::to_vec_pretty(&persisted)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}
