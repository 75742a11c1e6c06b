//! Connection and lifecycle status values

use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend reachability, owned by the connectivity monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// State of the persistent event channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum ChannelStatus {
    Opening,
    Open,
    Closing,
    #[default]
    Closed,
}

impl ChannelStatus {
    pub fn is_open(self) -> bool {
        self == ChannelStatus::Open
    }
}

/// Where a simulation sits in its lifecycle.
///
/// `Uncreated` and `Deleted` have no variant: those simulations simply have no
/// phase in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum SimulationPhase {
    /// Known to the backend, not started by this client
    Created,
    /// Started; a poller or the event channel is tracking it
    Running,
    /// A snapshot reported `running = false`
    Completed,
    /// Tracking was cancelled or failed before completion
    Stopped,
}

impl SimulationPhase {
    pub fn is_active(self) -> bool {
        self == SimulationPhase::Running
    }
}
