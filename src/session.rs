//! Session wiring: one registry shared by the controller and the monitors

use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::SimulationBackend;
use crate::backends::HttpBackend;
use crate::config::SyncConfig;
use crate::lifecycle::{BootstrapReport, SimulationController};
use crate::monitor::{EventChannel, LivenessMonitor, PeriodicPing, Transport, WebSocketTransport};
use crate::registry::{RegistryState, SimulationRegistry};
use crate::types::UpdateRate;
use crate::Result;

/// Everything needed to mirror one backend.
///
/// The session owns the background tasks it starts (pollers, the periodic
/// ping and the event channel); dropping it cancels all of them.
pub struct SyncSession<B: SimulationBackend = HttpBackend> {
    config: SyncConfig,
    registry: SimulationRegistry,
    controller: SimulationController<B>,
    liveness: LivenessMonitor<B>,
    periodic_ping: Option<PeriodicPing>,
    channel: Option<EventChannel>,
}

impl SyncSession<HttpBackend> {
    /// Connect to the configured HTTP backend and load its simulations.
    ///
    /// Starts the periodic ping and the WebSocket event channel when
    /// configured, then bootstraps the registry. A failed bootstrap is logged
    /// and left in the registry's last error; it does not fail the session.
    pub async fn connect(config: SyncConfig) -> Result<Self> {
        let backend = HttpBackend::new(&config)?;
        let session = Self::new(config, backend, WebSocketTransport)?;

        match session.bootstrap().await {
            Ok(report) => info!(
                simulations = report.ids.len(),
                failed = report.failures.len(),
                "Session bootstrapped"
            ),
            Err(e) => warn!(error = %e, "Session bootstrap failed"),
        }
        Ok(session)
    }
}

impl<B: SimulationBackend> SyncSession<B> {
    /// Wire a session around `backend`; `transport` is only used when the
    /// configuration enables the event channel.
    pub fn new<T: Transport>(config: SyncConfig, backend: B, transport: T) -> Result<Self> {
        config.validate()?;

        let registry = SimulationRegistry::new();
        let backend = Arc::new(backend);
        let controller = SimulationController::new(
            Arc::clone(&backend),
            registry.clone(),
            config.poll_interval(),
        )?;
        let liveness = LivenessMonitor::new(backend, registry.clone());

        let periodic_ping =
            config.ping_interval().map(|period| liveness.spawn_periodic(period)).transpose()?;
        let channel = config
            .event_channel
            .clone()
            .map(|channel| EventChannel::spawn(transport, channel, registry.clone()))
            .transpose()?;

        info!(
            base_url = %config.base_url,
            ping = periodic_ping.is_some(),
            event_channel = channel.is_some(),
            "Sync session started"
        );

        Ok(Self { config, registry, controller, liveness, periodic_ping, channel })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &SimulationRegistry {
        &self.registry
    }

    pub fn controller(&self) -> &SimulationController<B> {
        &self.controller
    }

    pub fn liveness(&self) -> &LivenessMonitor<B> {
        &self.liveness
    }

    /// The event channel, when configured.
    pub fn channel(&self) -> Option<&EventChannel> {
        self.channel.as_ref()
    }

    /// Stream of registry states; see [`SimulationRegistry::updates`].
    pub fn updates(&self, rate: UpdateRate) -> BoxStream<'static, Arc<RegistryState>> {
        self.registry.updates(rate)
    }

    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        self.controller.bootstrap().await
    }

    /// Stop every background task, waiting for the ping and the channel to exit.
    pub async fn shutdown(mut self) {
        self.controller.stop_all();
        if let Some(ping) = self.periodic_ping.take() {
            ping.shutdown().await;
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        info!("Sync session shut down");
    }
}

impl<B: SimulationBackend> Drop for SyncSession<B> {
    fn drop(&mut self) {
        self.controller.stop_all();
    }
}
