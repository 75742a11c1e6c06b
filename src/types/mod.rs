//! Core types for mirrored simulation data.
//!
//! ## Architecture
//!
//! The types mirror what the collision simulation backend reports:
//! - [`SimulationId`] identifies a simulation (integer or string)
//! - [`SimulationModel`] is one complete snapshot, replaced wholesale on every update
//! - [`ModelFrames`] holds one protocol model's enable flag and its frame chains
//! - [`Frame`] is a single transmitted frame with collision and loss flags
//! - [`SimulationParameters`] configures traffic intensity and enabled models
//! - [`ConnectionStatus`], [`ChannelStatus`] and [`SimulationPhase`] describe
//!   connectivity and lifecycle state
//!
//! ## Usage Example
//!
//! ```rust
//! use lpwan_sync::types::{ModelKind, SimulationModel};
//!
//! let model: SimulationModel = serde_json::from_str(r#"{
//!     "simulationRunning": false,
//!     "simulationMessagePerSecond": 2,
//!     "MiotyModelRun": true,
//!     "MiotyFrames": [{"channel": 3, "group": 0, "usStart": 0, "usEnd": 9,
//!                      "collision": true, "lost": true, "first": true, "next": null}],
//!     "SigfoxModelRun": false, "SigfoxFrames": [],
//!     "LoRaWanRun": false, "LoRaWanFrames": []
//! }"#).unwrap();
//!
//! let mioty = model.model(ModelKind::Mioty);
//! assert_eq!(mioty.frames.heads().count(), 1);
//! assert_eq!(mioty.outcome_counts().lost_collided, 1);
//! ```

pub(crate) mod frame;
mod id;
mod simulation;
mod status;
mod update_rate;

// Re-export all public types
pub use frame::{Frame, FrameIndex, FrameOutcome, OutcomeCounts};
pub use id::SimulationId;
pub use simulation::{ModelFrames, ModelKind, SimulationModel, SimulationParameters};
pub use status::{ChannelStatus, ConnectionStatus, SimulationPhase};
pub use update_rate::UpdateRate;
