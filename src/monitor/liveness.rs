//! Liveness ping against the backend

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::SimulationBackend;
use crate::poller::check_period;
use crate::registry::SimulationRegistry;
use crate::types::ConnectionStatus;
use crate::Result;

/// Pings the backend and mirrors the result into the registry's connection status.
pub struct LivenessMonitor<B> {
    backend: Arc<B>,
    registry: SimulationRegistry,
}

impl<B> Clone for LivenessMonitor<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend), registry: self.registry.clone() }
    }
}

impl<B: SimulationBackend> LivenessMonitor<B> {
    pub fn new(backend: Arc<B>, registry: SimulationRegistry) -> Self {
        Self { backend, registry }
    }

    /// Ping once.
    ///
    /// Success sets the status to connected. Any failure sets it to
    /// disconnected, records the error and returns it.
    pub async fn ping(&self) -> Result<()> {
        self.registry.clear_error();
        match self.backend.ping().await {
            Ok(()) => {
                self.registry.set_connection_status(ConnectionStatus::Connected);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Liveness ping failed");
                self.registry.set_connection_status(ConnectionStatus::Disconnected);
                self.registry.record_error(&e);
                Err(e)
            }
        }
    }

    /// Ping every `period` until the returned handle is cancelled or dropped.
    ///
    /// The first ping is sent immediately. A zero `period` is rejected.
    pub fn spawn_periodic(&self, period: Duration) -> Result<PeriodicPing> {
        check_period("ping interval", period)?;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let monitor = self.clone();

        let join = tokio::spawn(async move {
            info!(?period, "Periodic liveness ping started");
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Failures are already recorded in the registry
                        if let Err(e) = monitor.ping().await {
                            debug!(error = %e, "Periodic ping reported failure");
                        }
                    }
                }
            }
            info!("Periodic liveness ping stopped");
        });

        Ok(PeriodicPing { cancel, join })
    }
}

/// Handle to a running periodic ping.
#[derive(Debug)]
pub struct PeriodicPing {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl PeriodicPing {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.join).await;
    }
}

impl Drop for PeriodicPing {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Call, Failure, ScriptedBackend};

    fn monitor(backend: ScriptedBackend) -> (LivenessMonitor<ScriptedBackend>, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        (LivenessMonitor::new(Arc::clone(&backend), SimulationRegistry::new()), backend)
    }

    #[tokio::test]
    async fn server_error_disconnects_after_success() {
        let backend = ScriptedBackend::new();
        backend.script_ping(Ok(())).script_ping(Err(Failure::Status(500)));
        let (monitor, _) = monitor(backend);

        monitor.ping().await.unwrap();
        assert_eq!(monitor.registry.connection_status(), ConnectionStatus::Connected);
        assert!(monitor.registry.last_error().is_none());

        let error = monitor.ping().await.unwrap_err();
        assert_eq!(error.status(), Some(500));
        assert_eq!(monitor.registry.connection_status(), ConnectionStatus::Disconnected);
        assert!(!monitor.registry.last_error().unwrap().is_empty());
    }

    #[tokio::test]
    async fn network_failure_disconnects() {
        let backend = ScriptedBackend::new();
        backend.script_ping(Err(Failure::Network));
        let (monitor, _) = monitor(backend);

        assert!(monitor.ping().await.unwrap_err().is_retryable());
        assert_eq!(monitor.registry.connection_status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn successful_ping_clears_previous_error() {
        let backend = ScriptedBackend::new();
        backend.script_ping(Err(Failure::Status(503)));
        let (monitor, _) = monitor(backend);

        let _ = monitor.ping().await;
        monitor.ping().await.unwrap();
        assert!(monitor.registry.last_error().is_none());
        assert_eq!(monitor.registry.connection_status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_ping_runs_until_cancelled() {
        let (monitor, backend) = monitor(ScriptedBackend::new());
        let handle = monitor.spawn_periodic(Duration::from_secs(5)).unwrap();

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(backend.count(|c| *c == Call::Ping), 3);

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.count(|c| *c == Call::Ping), 3);
    }

    #[tokio::test]
    async fn zero_ping_period_is_rejected() {
        let (monitor, backend) = monitor(ScriptedBackend::new());
        let error = monitor.spawn_periodic(Duration::ZERO).unwrap_err();
        assert!(matches!(error, crate::SyncError::InvalidArgument { .. }));
        assert!(backend.calls().is_empty());
    }
}
