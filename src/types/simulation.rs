//! Simulation snapshots and creation parameters

use serde::{Deserialize, Serialize};

use crate::chain::FrameChains;
use crate::types::OutcomeCounts;
use crate::{Result, SyncError};

/// The competing wireless protocols simulated by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum ModelKind {
    Mioty,
    Sigfox,
    LoRaWan,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Mioty, ModelKind::Sigfox, ModelKind::LoRaWan];

    pub fn label(self) -> &'static str {
        match self {
            ModelKind::Mioty => "Mioty",
            ModelKind::Sigfox => "Sigfox",
            ModelKind::LoRaWan => "LoRaWan",
        }
    }
}

/// One model's enable flag and frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct ModelFrames {
    pub enabled: bool,
    #[cfg_attr(feature = "tauri", specta(type = Vec<crate::types::Frame>))]
    pub frames: FrameChains,
}

impl ModelFrames {
    pub fn outcome_counts(&self) -> OutcomeCounts {
        self.frames.outcome_counts()
    }
}

/// Full state of one simulation as last reported by the backend.
///
/// Snapshots are replaced wholesale on every fetch or push; nothing patches them
/// in place. Deserialization accepts the backend payload, where model flags may
/// live either at the top level or inside the nested `input` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireSimulation", rename_all = "camelCase")]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct SimulationModel {
    pub running: bool,
    pub messages_per_second: f64,
    pub mioty: ModelFrames,
    pub sigfox: ModelFrames,
    pub lorawan: ModelFrames,
}

impl SimulationModel {
    pub fn model(&self, kind: ModelKind) -> &ModelFrames {
        match kind {
            ModelKind::Mioty => &self.mioty,
            ModelKind::Sigfox => &self.sigfox,
            ModelKind::LoRaWan => &self.lorawan,
        }
    }

    /// Check that disabled models carry no frames and every chain is well formed.
    pub fn validate(&self) -> Result<()> {
        for kind in ModelKind::ALL {
            let model = self.model(kind);
            if !model.enabled && !model.frames.is_empty() {
                return Err(SyncError::integrity_error(format!(
                    "{} is disabled but reports {} frames",
                    kind.label(),
                    model.frames.len()
                )));
            }
            model.frames.validate().map_err(|e| {
                SyncError::integrity_error(format!("{} frames: {}", kind.label(), e))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WireInput {
    #[serde(rename = "simulationMessagePerSecond")]
    messages_per_second: Option<f64>,
    #[serde(rename = "MiotyModelRun")]
    mioty: Option<bool>,
    #[serde(rename = "SigfoxModelRun")]
    sigfox: Option<bool>,
    #[serde(rename = "LoRaWanModelRun", alias = "LoRaWanRun")]
    lorawan: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WireSimulation {
    #[serde(rename = "simulationRunning", default)]
    running: bool,
    #[serde(rename = "simulationMessagePerSecond")]
    messages_per_second: Option<f64>,
    #[serde(rename = "MiotyModelRun")]
    mioty_run: Option<bool>,
    #[serde(rename = "MiotyFrames", default)]
    mioty_frames: FrameChains,
    #[serde(rename = "SigfoxModelRun")]
    sigfox_run: Option<bool>,
    #[serde(rename = "SigfoxFrames", default)]
    sigfox_frames: FrameChains,
    #[serde(rename = "LoRaWanRun", alias = "LoRaWanModelRun")]
    lorawan_run: Option<bool>,
    #[serde(rename = "LoRaWanFrames", default)]
    lorawan_frames: FrameChains,
    input: Option<WireInput>,
}

impl TryFrom<WireSimulation> for SimulationModel {
    type Error = String;

    fn try_from(wire: WireSimulation) -> std::result::Result<Self, Self::Error> {
        let input = wire.input.as_ref();
        let messages_per_second = wire
            .messages_per_second
            .or_else(|| input.and_then(|i| i.messages_per_second))
            .ok_or_else(|| "missing simulationMessagePerSecond".to_string())?;

        // Without an explicit flag, a model is enabled exactly when it has frames.
        let flag = |explicit: Option<bool>, nested: Option<bool>, frames: &FrameChains| {
            explicit.or(nested).unwrap_or(!frames.is_empty())
        };

        Ok(SimulationModel {
            running: wire.running,
            messages_per_second,
            mioty: ModelFrames {
                enabled: flag(wire.mioty_run, input.and_then(|i| i.mioty), &wire.mioty_frames),
                frames: wire.mioty_frames,
            },
            sigfox: ModelFrames {
                enabled: flag(wire.sigfox_run, input.and_then(|i| i.sigfox), &wire.sigfox_frames),
                frames: wire.sigfox_frames,
            },
            lorawan: ModelFrames {
                enabled: flag(
                    wire.lorawan_run,
                    input.and_then(|i| i.lorawan),
                    &wire.lorawan_frames,
                ),
                frames: wire.lorawan_frames,
            },
        })
    }
}

/// Configuration sent when creating or reconfiguring a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct SimulationParameters {
    #[serde(rename = "simulationMessagePerSecond")]
    pub messages_per_second: f64,
    #[serde(rename = "MiotyModelRun")]
    pub mioty: bool,
    #[serde(rename = "SigfoxModelRun")]
    pub sigfox: bool,
    #[serde(rename = "LoRaWanModelRun", alias = "LoRaWanRun")]
    pub lorawan: bool,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self { messages_per_second: 2.0, mioty: true, sigfox: false, lorawan: false }
    }
}

impl SimulationParameters {
    pub fn new(messages_per_second: f64) -> Self {
        Self { messages_per_second, ..Self::default() }
    }

    pub fn with_model(mut self, kind: ModelKind, enabled: bool) -> Self {
        match kind {
            ModelKind::Mioty => self.mioty = enabled,
            ModelKind::Sigfox => self.sigfox = enabled,
            ModelKind::LoRaWan => self.lorawan = enabled,
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.messages_per_second.is_finite() || self.messages_per_second <= 0.0 {
            return Err(SyncError::invalid_argument(format!(
                "messages per second must be a positive number, got {}",
                self.messages_per_second
            )));
        }
        Ok(())
    }
}
