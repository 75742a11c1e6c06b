//! Client-side synchronization engine for the LPWAN collision simulation backend.
//!
//! The backend simulates radio frames of three LPWAN protocols (LoRaWAN, Sigfox
//! and Mioty) colliding on shared channels. This crate keeps a local, observable
//! mirror of the backend's simulations consistent with the remote state.
//!
//! # Features
//!
//! - **Lifecycle**: create, run, fetch, list, reconfigure and delete simulations
//! - **Polling**: one cancellable poller per running simulation, stopping on the
//!   first finished snapshot
//! - **Connectivity**: on-demand or periodic liveness pings plus an optional
//!   WebSocket event channel with heartbeat and reconnect
//! - **Observation**: registry snapshots as a `watch` channel or a throttled stream
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use lpwan_sync::{LpwanSync, SimulationParameters, SyncConfig, UpdateRate};
//!
//! #[tokio::main]
//! async fn main() -> lpwan_sync::Result<()> {
//!     let session = LpwanSync::connect(SyncConfig::from_env()?).await?;
//!
//!     let id = session.controller().create(&SimulationParameters::new(2.0)).await?;
//!     session.controller().run(&id).await?;
//!
//!     let mut updates = session.updates(UpdateRate::Max(2));
//!     while let Some(state) = updates.next().await {
//!         if let Some(model) = state.simulation(&id) {
//!             println!("running: {}", model.running);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod chain;
pub mod config;
mod error;
pub mod logging;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Synchronization
pub mod backend;
pub mod backends;
pub mod lifecycle;
pub mod monitor;
pub mod poller;
pub mod registry;
pub mod session;
pub mod stream;

// Core exports
pub use chain::{ChainIter, FrameChains};
pub use config::{ChannelConfig, SyncConfig};
pub use error::*;
pub use types::*;

// Main API exports
pub use backend::SimulationBackend;
pub use backends::HttpBackend;
pub use lifecycle::{BootstrapReport, SimulationController};
pub use monitor::{ChannelMessage, EventChannel, LivenessMonitor, Transport, WebSocketTransport};
pub use poller::{PollOutcome, Poller, PollerHandle};
pub use registry::{ApplyOutcome, RegistryEntry, RegistryState, SimulationRegistry, SnapshotSource};
pub use session::SyncSession;

/// Unified entry point for synchronization sessions.
///
/// ```rust,no_run
/// use lpwan_sync::LpwanSync;
///
/// #[tokio::main]
/// async fn main() -> lpwan_sync::Result<()> {
///     let session = LpwanSync::connect_from_env().await?;
///     println!("{} simulations", session.registry().simulation_ids().len());
///     Ok(())
/// }
/// ```
pub struct LpwanSync;

impl LpwanSync {
    /// Connect to the backend described by `config` and load its simulations.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid or the HTTP client
    /// cannot be built. Backend failures during the initial load are recorded in
    /// the registry instead.
    pub async fn connect(config: SyncConfig) -> Result<SyncSession> {
        SyncSession::connect(config).await
    }

    /// Like [`LpwanSync::connect`], using defaults and the `API_BASE_URL` override.
    pub async fn connect_from_env() -> Result<SyncSession> {
        SyncSession::connect(SyncConfig::from_env()?).await
    }
}
