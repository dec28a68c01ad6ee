use serde::{Deserialize, Serialize};

/// A replication factor of `-1` means "pin on every cluster node".
pub const REPLICATION_EVERYWHERE: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinError {
    EmptyCid,
    InvalidReplicationFactor { factor: i64 },
    MismatchedReplicationFactors { min: i64, max: i64 },
}

impl std::fmt::Display for PinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCid => write!(f, "pin cid must not be empty"),
            Self::InvalidReplicationFactor { factor } => {
                write!(f, "invalid replication factor: {factor} (expected -1 or > 0)")
            }
            Self::MismatchedReplicationFactors { min, max } => write!(
                f,
                "mismatched replication factors: min={min} max={max} (both -1, or positive with min <= max)"
            ),
        }
    }
}

impl std::error::Error for PinError {}

/// One pinned-content entry tracked by the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pin {
    pub cid: String,
    #[serde(default)]
    pub name: String,
    pub replication_factor_min: i64,
    pub replication_factor_max: i64,
    #[serde(default)]
    pub allocations: Vec<String>,
}

impl Pin {
    pub fn everywhere(cid: impl Into<String>) -> Self {
        Self {
            cid: cid.into(),
            name: String::new(),
            replication_factor_min: REPLICATION_EVERYWHERE,
            replication_factor_max: REPLICATION_EVERYWHERE,
            allocations: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), PinError> {
        if self.cid.is_empty() {
            return Err(PinError::EmptyCid);
        }
        validate_replication_factors(self.replication_factor_min, self.replication_factor_max)
    }
}

pub fn validate_replication_factors(min: i64, max: i64) -> Result<(), PinError> {
    for factor in [min, max] {
        if factor != REPLICATION_EVERYWHERE && factor <= 0 {
            return Err(PinError::InvalidReplicationFactor { factor });
        }
    }
    let everywhere = (min == REPLICATION_EVERYWHERE, max == REPLICATION_EVERYWHERE);
    match everywhere {
        (true, true) => Ok(()),
        (false, false) if min <= max => Ok(()),
        _ => Err(PinError::MismatchedReplicationFactors { min, max }),
    }
}
