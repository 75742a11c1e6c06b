//! Simulation identifiers

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::{Result, SyncError};

/// Identifier assigned by the backend when a simulation is created.
///
/// The reference backend hands out integers, but identifiers are also accepted
/// as strings so the client works against deployments that key simulations by name.
/// On the wire an identifier may appear bare (`7`, `"alpha"`) or wrapped the way
/// the backend serializes its id type (`{"id": 7}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum SimulationId {
    Number(i64),
    Name(String),
}

impl SimulationId {
    /// Reject identifiers that cannot be placed in a request path.
    pub fn validate(&self) -> Result<()> {
        match self {
            SimulationId::Number(_) => Ok(()),
            SimulationId::Name(name) => {
                if name.trim().is_empty() {
                    return Err(SyncError::invalid_argument(
                        "simulation id must be a number or a non-empty string",
                    ));
                }
                if name.contains(['/', '?', '#']) {
                    return Err(SyncError::invalid_argument(format!(
                        "simulation id '{name}' contains reserved path characters"
                    )));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationId::Number(n) => write!(f, "{n}"),
            SimulationId::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for SimulationId {
    fn from(value: i64) -> Self {
        SimulationId::Number(value)
    }
}

impl From<&str> for SimulationId {
    fn from(value: &str) -> Self {
        SimulationId::Name(value.to_string())
    }
}

impl From<String> for SimulationId {
    fn from(value: String) -> Self {
        SimulationId::Name(value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Name(String),
    Wrapped { id: Box<RawId> },
}

impl From<RawId> for SimulationId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Number(n) => SimulationId::Number(n),
            RawId::Name(name) => SimulationId::Name(name),
            RawId::Wrapped { id } => SimulationId::from(*id),
        }
    }
}

impl<'de> Deserialize<'de> for SimulationId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawId::deserialize(deserializer).map(SimulationId::from)
    }
}
