//! Simulation lifecycle operations
//!
//! [`SimulationController`] drives each simulation through
//! `Created → Running → Completed/Stopped → Deleted` against the backend and
//! mirrors the results into the [`SimulationRegistry`].
//!
//! Every operation clears the registry's last error on entry. On failure it
//! records the error's message there and returns the error to the caller;
//! nothing is retried.
//!
//! ```rust,no_run
//! use lpwan_sync::{SimulationController, SimulationParameters, SimulationRegistry};
//! use lpwan_sync::backends::HttpBackend;
//! use lpwan_sync::config::SyncConfig;
//! use std::sync::Arc;
//!
//! # async fn demo() -> lpwan_sync::Result<()> {
//! let config = SyncConfig::from_env()?;
//! let registry = SimulationRegistry::new();
//! let controller = SimulationController::new(
//!     Arc::new(HttpBackend::new(&config)?),
//!     registry.clone(),
//!     config.poll_interval(),
//! )?;
//!
//! let id = controller.create(&SimulationParameters::default()).await?;
//! controller.run(&id).await?;
//! # Ok(())
//! # }
//! ```

use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::SimulationBackend;
use crate::poller::{Poller, PollerHandle, check_period, fetch_and_apply};
use crate::registry::SimulationRegistry;
use crate::types::{SimulationId, SimulationModel, SimulationParameters, SimulationPhase};
use crate::{Result, SyncError};

/// Result of [`SimulationController::bootstrap`].
#[derive(Debug, Default)]
pub struct BootstrapReport {
    /// Identifiers listed by the backend
    pub ids: Vec<SimulationId>,
    /// Identifiers whose snapshot was fetched
    pub fetched: Vec<SimulationId>,
    /// Identifiers whose fetch failed, with the error
    pub failures: Vec<(SimulationId, SyncError)>,
}

impl BootstrapReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

type PollerMap = HashMap<SimulationId, PollerHandle>;

/// Lifecycle controller for simulations on one backend.
///
/// Clones share the backend, registry and running pollers. Operations on
/// different identifiers are independent; overlapping `run` and `delete` calls
/// on the same identifier are not serialized.
pub struct SimulationController<B: ?Sized> {
    backend: Arc<B>,
    registry: SimulationRegistry,
    poll_interval: Duration,
    pollers: Arc<Mutex<PollerMap>>,
}

impl<B: ?Sized> Clone for SimulationController<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            registry: self.registry.clone(),
            poll_interval: self.poll_interval,
            pollers: Arc::clone(&self.pollers),
        }
    }
}

impl<B: SimulationBackend + ?Sized> SimulationController<B> {
    /// Fails with [`SyncError::InvalidArgument`] if `poll_interval` is zero.
    pub fn new(
        backend: Arc<B>,
        registry: SimulationRegistry,
        poll_interval: Duration,
    ) -> Result<Self> {
        check_period("poll interval", poll_interval)?;
        Ok(Self { backend, registry, poll_interval, pollers: Arc::new(Mutex::new(HashMap::new())) })
    }

    pub fn registry(&self) -> &SimulationRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn with_pollers<R>(&self, f: impl FnOnce(&mut PollerMap) -> R) -> R {
        let mut pollers = self.pollers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut pollers)
    }

    /// Record a failure and hand it back.
    fn fail<T>(&self, operation: &str, error: SyncError) -> Result<T> {
        warn!(operation, error = %error, "Operation failed");
        self.registry.record_error(&error);
        Err(error)
    }

    fn check_id(&self, operation: &str, id: &SimulationId) -> Result<()> {
        match id.validate() {
            Ok(()) => Ok(()),
            Err(e) => self.fail(operation, e),
        }
    }

    /// Create a simulation and register its identifier.
    ///
    /// The identifier is added to the known ids only when the backend call
    /// succeeds; no snapshot entry exists until the first fetch.
    pub async fn create(&self, parameters: &SimulationParameters) -> Result<SimulationId> {
        self.registry.clear_error();
        if let Err(e) = parameters.validate() {
            return self.fail("create", e);
        }

        let id = match self.backend.create(parameters).await {
            Ok(id) => id,
            Err(e) => return self.fail("create", e),
        };
        if self.registry.snapshot().contains(&id) {
            return self.fail(
                "create",
                SyncError::protocol_error(
                    "create simulation",
                    format!("backend returned already known id {id}"),
                ),
            );
        }

        self.registry.register_id(&id);
        info!(%id, rate = parameters.messages_per_second, "Simulation created");
        Ok(id)
    }

    /// Start a known simulation and poll it until it finishes.
    ///
    /// The backend call is passed through even if the simulation already runs.
    /// A poller left over from an earlier run is replaced.
    pub async fn run(&self, id: &SimulationId) -> Result<Value> {
        self.registry.clear_error();
        self.check_id("run", id)?;
        if !self.registry.snapshot().contains(id) {
            return self.fail(
                "run",
                SyncError::invalid_argument(format!("unknown simulation id {id}")),
            );
        }

        let ack = match self.backend.run(id).await {
            Ok(ack) => ack,
            Err(e) => return self.fail("run", e),
        };

        if !self.registry.set_phase(id, SimulationPhase::Running) {
            // Deleted while the run request was in flight
            debug!(%id, "Simulation vanished before polling started");
            return Ok(ack);
        }

        let handle = match Poller::spawn(
            Arc::clone(&self.backend),
            self.registry.clone(),
            id.clone(),
            self.poll_interval,
        ) {
            Ok(handle) => handle,
            Err(e) => return self.fail("run", e),
        };
        if let Some(previous) = self.with_pollers(|pollers| pollers.insert(id.clone(), handle)) {
            debug!(%id, "Replacing existing poller");
            previous.cancel();
        }
        info!(%id, interval = ?self.poll_interval, "Simulation running");
        Ok(ack)
    }

    /// Fetch the current snapshot and store it in the registry.
    ///
    /// Fetching an identifier the registry does not know adds it; fetching one
    /// deleted in the meantime returns the snapshot without storing it.
    pub async fn fetch_values(&self, id: &SimulationId) -> Result<SimulationModel> {
        self.registry.clear_error();
        self.check_id("fetch values", id)?;
        let (model, outcome) = fetch_and_apply(&*self.backend, &self.registry, id).await?;
        debug!(%id, ?outcome, "Values fetched");
        Ok(model)
    }

    /// Replace the known identifiers with the backend's list.
    pub async fn list_ids(&self) -> Result<Vec<SimulationId>> {
        self.registry.clear_error();
        let ids = match self.backend.ids().await {
            Ok(ids) => ids,
            Err(e) => return self.fail("list ids", e),
        };

        self.registry.replace_ids(&ids);
        self.with_pollers(|pollers| pollers.retain(|id, _| ids.contains(id)));
        debug!(count = ids.len(), "Identifiers listed");
        Ok(ids)
    }

    /// Update a simulation's parameters on the backend.
    pub async fn set_parameters(
        &self,
        id: &SimulationId,
        parameters: &SimulationParameters,
    ) -> Result<Value> {
        self.registry.clear_error();
        self.check_id("set parameters", id)?;
        if let Err(e) = parameters.validate() {
            return self.fail("set parameters", e);
        }

        match self.backend.set_parameters(id, parameters).await {
            Ok(ack) => Ok(ack),
            Err(e) => self.fail("set parameters", e),
        }
    }

    /// Delete a simulation; on success its poller is cancelled and the
    /// registry forgets it.
    pub async fn delete(&self, id: &SimulationId) -> Result<Value> {
        self.registry.clear_error();
        self.check_id("delete", id)?;

        let ack = match self.backend.delete(id).await {
            Ok(ack) => ack,
            Err(e) => return self.fail("delete", e),
        };

        if let Some(poller) = self.with_pollers(|pollers| pollers.remove(id)) {
            poller.cancel();
        }
        self.registry.remove(id);
        info!(%id, "Simulation deleted");
        Ok(ack)
    }

    /// Cancel the poller for `id`. Returns whether one was active.
    pub fn stop_polling(&self, id: &SimulationId) -> bool {
        let Some(poller) = self.with_pollers(|pollers| pollers.remove(id)) else {
            return false;
        };
        let was_active = !poller.is_finished();
        poller.cancel();
        if was_active {
            self.registry.finish_running(id, SimulationPhase::Stopped);
            info!(%id, "Polling stopped");
        }
        was_active
    }

    pub fn is_polling(&self, id: &SimulationId) -> bool {
        self.with_pollers(|pollers| pollers.get(id).is_some_and(|poller| !poller.is_finished()))
    }

    /// Cancel every poller.
    pub fn stop_all(&self) {
        let pollers: Vec<_> = self.with_pollers(|pollers| pollers.drain().collect());
        for (id, poller) in pollers {
            if !poller.is_finished() {
                self.registry.finish_running(&id, SimulationPhase::Stopped);
            }
            poller.cancel();
        }
    }

    /// List identifiers, then fetch every listed simulation concurrently.
    ///
    /// Fails only if listing fails; individual fetch failures are collected in
    /// the report without aborting the others.
    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        let ids = self.list_ids().await?;

        let results = join_all(ids.iter().map(|id| async move {
            let result = fetch_and_apply(&*self.backend, &self.registry, id).await;
            (id.clone(), result)
        }))
        .await;

        let mut report = BootstrapReport { ids: ids.clone(), ..BootstrapReport::default() };
        for (id, result) in results {
            match result {
                Ok(_) => report.fetched.push(id),
                Err(e) => report.failures.push((id, e)),
            }
        }

        info!(
            listed = report.ids.len(),
            fetched = report.fetched.len(),
            failed = report.failures.len(),
            "Bootstrap finished"
        );
        Ok(report)
    }
}
