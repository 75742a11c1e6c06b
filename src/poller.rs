//! Per-simulation periodic fetch task

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backend::SimulationBackend;
use crate::registry::{ApplyOutcome, SimulationRegistry, SnapshotSource};
use crate::types::{SimulationId, SimulationModel, SimulationPhase};
use crate::{Result, SyncError};

/// Why a poller stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A fetched snapshot reported the simulation as finished
    Completed { fetches: usize },
    /// Cancelled by the caller
    Cancelled { fetches: usize },
    /// A fetch failed; the error was recorded in the registry
    Failed { fetches: usize, error: String },
}

impl PollOutcome {
    pub fn fetches(&self) -> usize {
        match self {
            PollOutcome::Completed { fetches }
            | PollOutcome::Cancelled { fetches }
            | PollOutcome::Failed { fetches, .. } => *fetches,
        }
    }
}

/// Fetch one snapshot and hand it to the registry.
///
/// Clears the last error first. The ticket is taken before the request goes
/// out, so a slower response cannot overwrite a newer snapshot.
pub(crate) async fn fetch_and_apply<B>(
    backend: &B,
    registry: &SimulationRegistry,
    id: &SimulationId,
) -> Result<(SimulationModel, ApplyOutcome)>
where
    B: SimulationBackend + ?Sized,
{
    registry.clear_error();
    let ticket = registry.issue_ticket();

    let fetched = match backend.values(id).await {
        Ok(model) => model.validate().map(|()| model),
        Err(e) => Err(e),
    };
    match fetched {
        Ok(model) => {
            let outcome =
                registry.apply_snapshot(id, model.clone(), ticket, SnapshotSource::Pull);
            trace!(%id, ticket, ?outcome, running = model.running, "Fetched snapshot");
            Ok((model, outcome))
        }
        Err(e) => {
            warn!(%id, error = %e, "Fetching simulation values failed");
            registry.record_error(&e);
            Err(e)
        }
    }
}

/// Reject periods that would make a tokio interval panic.
pub(crate) fn check_period(what: &str, period: Duration) -> Result<()> {
    if period.is_zero() {
        return Err(SyncError::invalid_argument(format!("{what} must be non-zero")));
    }
    Ok(())
}

/// Spawns polling tasks
pub struct Poller;

impl Poller {
    /// Fetch `id` every `period`, starting one period from now.
    ///
    /// The task stops after the first snapshot with `running == false`, on the
    /// first failed fetch, or when cancelled through the handle. A zero
    /// `period` is rejected before anything is spawned.
    pub fn spawn<B>(
        backend: Arc<B>,
        registry: SimulationRegistry,
        id: SimulationId,
        period: Duration,
    ) -> Result<PollerHandle>
    where
        B: SimulationBackend + ?Sized,
    {
        check_period("poll interval", period)?;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_id = id.clone();

        let join = tokio::spawn(async move {
            let outcome = Self::poll_task(&*backend, &registry, &task_id, period, task_cancel).await;

            // A stale final snapshot must still end the running phase. Whoever
            // cancels a poller owns the phase change.
            match outcome {
                PollOutcome::Completed { .. } => {
                    registry.finish_running(&task_id, SimulationPhase::Completed)
                }
                PollOutcome::Failed { .. } => {
                    registry.finish_running(&task_id, SimulationPhase::Stopped)
                }
                PollOutcome::Cancelled { .. } => {}
            }
            info!(id = %task_id, ?outcome, "Poller stopped");
            outcome
        });

        Ok(PollerHandle { id, cancel, join })
    }

    async fn poll_task<B>(
        backend: &B,
        registry: &SimulationRegistry,
        id: &SimulationId,
        period: Duration,
        cancel: CancellationToken,
    ) -> PollOutcome
    where
        B: SimulationBackend + ?Sized,
    {
        debug!(%id, ?period, "Poller started");
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fetches = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled { fetches },
                _ = ticker.tick() => {}
            }

            fetches += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled { fetches },
                result = fetch_and_apply(backend, registry, id) => result,
            };

            match result {
                Ok((model, _)) if !model.running => return PollOutcome::Completed { fetches },
                Ok(_) => {}
                Err(e) => return PollOutcome::Failed { fetches, error: e.to_string() },
            }
        }
    }
}

/// Handle to a running poller. Dropping it cancels the task.
pub struct PollerHandle {
    id: SimulationId,
    cancel: CancellationToken,
    join: JoinHandle<PollOutcome>,
}

impl PollerHandle {
    pub fn id(&self) -> &SimulationId {
        &self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task to stop on its own.
    pub async fn join(mut self) -> PollOutcome {
        match (&mut self.join).await {
            Ok(outcome) => outcome,
            Err(e) => PollOutcome::Failed { fetches: 0, error: e.to_string() },
        }
    }

    /// Cancel and wait for the task to exit.
    pub async fn stop(self) -> PollOutcome {
        self.cancel();
        self.join().await
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PollerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerHandle")
            .field("id", &self.id)
            .field("finished", &self.join.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Failure, ScriptedBackend, running_then_finished, sample_model};

    const PERIOD: Duration = Duration::from_secs(1);

    fn id(n: i64) -> SimulationId {
        SimulationId::Number(n)
    }

    fn running(registry: &SimulationRegistry, n: i64) {
        registry.register_id(&id(n));
        registry.set_phase(&id(n), SimulationPhase::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_first_finished_snapshot() {
        for n in [0usize, 1, 4] {
            let backend = Arc::new(ScriptedBackend::new());
            backend.script_values(id(1), running_then_finished(n));
            let registry = SimulationRegistry::new();
            running(&registry, 1);

            let handle =
                Poller::spawn(Arc::clone(&backend), registry.clone(), id(1), PERIOD).unwrap();
            assert_eq!(handle.join().await, PollOutcome::Completed { fetches: n + 1 });

            tokio::time::sleep(PERIOD * 10).await;
            assert_eq!(backend.values_calls(&id(1)), n + 1);
            assert_eq!(registry.phase(&id(1)), Some(SimulationPhase::Completed));
            assert!(!registry.get(&id(1)).unwrap().running);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_fetch_waits_one_period() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script_values(id(2), running_then_finished(0));
        let registry = SimulationRegistry::new();

        let started = Instant::now();
        let handle = Poller::spawn(backend, registry, id(2), PERIOD).unwrap();
        handle.join().await;
        assert!(started.elapsed() >= PERIOD);
        assert!(started.elapsed() < PERIOD * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_fetching() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script_values(id(3), [Ok(sample_model(true))]);
        let registry = SimulationRegistry::new();
        running(&registry, 3);

        let handle = Poller::spawn(Arc::clone(&backend), registry.clone(), id(3), PERIOD).unwrap();
        tokio::time::sleep(PERIOD * 3 + Duration::from_millis(100)).await;

        let outcome = handle.stop().await;
        assert_eq!(outcome, PollOutcome::Cancelled { fetches: 3 });
        assert_eq!(registry.phase(&id(3)), Some(SimulationPhase::Running));

        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(backend.values_calls(&id(3)), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_ends_polling_and_records_error() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script_values(id(4), [Ok(sample_model(true)), Err(Failure::Status(500))]);
        let registry = SimulationRegistry::new();
        running(&registry, 4);

        let handle = Poller::spawn(Arc::clone(&backend), registry.clone(), id(4), PERIOD).unwrap();
        let outcome = handle.join().await;

        assert!(matches!(outcome, PollOutcome::Failed { fetches: 2, .. }));
        assert_eq!(registry.phase(&id(4)), Some(SimulationPhase::Stopped));
        assert!(registry.last_error().unwrap().contains("500"));
        // The snapshot fetched before the failure is kept
        assert!(registry.get(&id(4)).unwrap().running);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script_values(id(5), [Ok(sample_model(true))]);
        let registry = SimulationRegistry::new();

        drop(Poller::spawn(Arc::clone(&backend), registry, id(5), PERIOD).unwrap());
        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(backend.values_calls(&id(5)), 0);
    }

    #[tokio::test]
    async fn zero_period_is_rejected_and_phase_untouched() {
        let backend = Arc::new(ScriptedBackend::new());
        let registry = SimulationRegistry::new();
        running(&registry, 6);

        let result = Poller::spawn(Arc::clone(&backend), registry.clone(), id(6), Duration::ZERO);
        assert!(matches!(result, Err(SyncError::InvalidArgument { .. })));
        assert_eq!(registry.phase(&id(6)), Some(SimulationPhase::Running));
        assert!(backend.calls().is_empty());
    }
}
