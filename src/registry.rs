//! Client-side mirror of every known simulation.
//!
//! [`SimulationRegistry`] is an explicit state container: build one per session
//! and hand clones of it to the lifecycle controller and the connectivity monitor.
//! All mutations replace whole fields inside a single `watch` update, so a
//! subscriber never observes a half-applied change.
//!
//! Readers either poll the latest [`RegistryState`] or subscribe to changes:
//!
//! ```rust,no_run
//! use lpwan_sync::{SimulationRegistry, UpdateRate};
//! use futures::StreamExt;
//!
//! # async fn demo(registry: SimulationRegistry) {
//! let mut updates = registry.updates(UpdateRate::Max(10));
//! while let Some(state) = updates.next().await {
//!     println!("{} simulations, status {}", state.simulation_ids().len(), state.connection_status());
//! }
//! # }
//! ```
//!
//! ## Late writes
//!
//! Every fetch takes a ticket before its request is sent. A snapshot is applied
//! only when its ticket is newer than the one already stored for that id, which
//! discards out-of-order responses. Deleted ids are tombstoned so a fetch that
//! resolves after the delete cannot bring the entry back. Every ticket issued
//! before a delete stays stale for that id, even once the backend lists or
//! creates it again.

use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, trace};

use crate::stream::ThrottleExt;
use crate::types::{ConnectionStatus, SimulationId, SimulationModel, SimulationPhase, UpdateRate};
use crate::SyncError;

/// Origin of a stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Fetched by request
    Pull,
    /// Delivered over the event channel
    Push,
}

/// Latest known snapshot of one simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub model: Arc<SimulationModel>,
    /// Ticket of the fetch or push that produced this snapshot
    pub ticket: u64,
    pub source: SnapshotSource,
}

/// What happened to a snapshot handed to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A newer snapshot was already stored
    Stale,
    /// The id was deleted; the write was dropped
    Dropped,
}

/// Immutable view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    simulation_ids: Vec<SimulationId>,
    simulations: HashMap<SimulationId, RegistryEntry>,
    phases: HashMap<SimulationId, SimulationPhase>,
    last_error: Option<String>,
    connection_status: ConnectionStatus,
    revision: u64,
    tombstones: HashSet<SimulationId>,
    /// Newest ticket issued before each id was last forgotten
    ticket_floors: HashMap<SimulationId, u64>,
}

impl RegistryState {
    /// Known identifiers, in creation/listing order.
    pub fn simulation_ids(&self) -> &[SimulationId] {
        &self.simulation_ids
    }

    pub fn entry(&self, id: &SimulationId) -> Option<&RegistryEntry> {
        self.simulations.get(id)
    }

    pub fn simulation(&self, id: &SimulationId) -> Option<&Arc<SimulationModel>> {
        self.simulations.get(id).map(|entry| &entry.model)
    }

    pub fn simulations(&self) -> impl Iterator<Item = (&SimulationId, &RegistryEntry)> {
        self.simulations.iter()
    }

    pub fn phase(&self, id: &SimulationId) -> Option<SimulationPhase> {
        self.phases.get(id).copied()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// Increments on every applied change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, id: &SimulationId) -> bool {
        self.simulation_ids.contains(id)
    }

    fn learn(&mut self, id: &SimulationId) {
        self.tombstones.remove(id);
        if !self.simulation_ids.contains(id) {
            self.simulation_ids.push(id.clone());
        }
    }

    fn forget(&mut self, id: &SimulationId, floor: u64) {
        self.simulation_ids.retain(|known| known != id);
        self.simulations.remove(id);
        self.phases.remove(id);
        self.tombstones.insert(id.clone());
        let stored = self.ticket_floors.entry(id.clone()).or_insert(0);
        *stored = (*stored).max(floor);
    }
}

struct RegistryInner {
    state: watch::Sender<Arc<RegistryState>>,
    tickets: AtomicU64,
}

/// Shared handle to the registry. Clones refer to the same store.
#[derive(Clone)]
pub struct SimulationRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for SimulationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.snapshot();
        f.debug_struct("SimulationRegistry")
            .field("simulation_ids", &state.simulation_ids)
            .field("revision", &state.revision)
            .finish()
    }
}

impl SimulationRegistry {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Arc::new(RegistryState::default()));
        Self { inner: Arc::new(RegistryInner { state, tickets: AtomicU64::new(0) }) }
    }

    /// Current state.
    pub fn snapshot(&self) -> Arc<RegistryState> {
        Arc::clone(&self.inner.state.borrow())
    }

    pub fn simulation_ids(&self) -> Vec<SimulationId> {
        self.snapshot().simulation_ids.clone()
    }

    pub fn get(&self, id: &SimulationId) -> Option<Arc<SimulationModel>> {
        self.snapshot().simulation(id).cloned()
    }

    pub fn phase(&self, id: &SimulationId) -> Option<SimulationPhase> {
        self.snapshot().phase(id)
    }

    pub fn last_error(&self) -> Option<String> {
        self.snapshot().last_error.clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.snapshot().connection_status
    }

    /// Receiver that is notified after every change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RegistryState>> {
        self.inner.state.subscribe()
    }

    /// Stream of states, starting with the current one.
    ///
    /// With [`UpdateRate::Max`], bursts of changes are collapsed and only the
    /// latest state of each interval is delivered.
    pub fn updates(&self, rate: UpdateRate) -> BoxStream<'static, Arc<RegistryState>> {
        let states = WatchStream::new(self.subscribe());
        match rate.throttle_interval() {
            None => states.boxed(),
            Some(interval) => states.throttle(interval).boxed(),
        }
    }

    /// Reserve a ticket for a snapshot about to be requested.
    pub(crate) fn issue_ticket(&self) -> u64 {
        self.inner.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn last_ticket(&self) -> u64 {
        self.inner.tickets.load(Ordering::SeqCst)
    }

    /// Apply `f` to a private copy of the state; publish it if `f` reports a change.
    fn modify<R>(&self, f: impl FnOnce(&mut RegistryState) -> (bool, R)) -> R {
        let mut result = None;
        self.inner.state.send_if_modified(|state| {
            let mut next = (**state).clone();
            let (changed, value) = f(&mut next);
            result = Some(value);
            if changed {
                next.revision += 1;
                *state = Arc::new(next);
            }
            changed
        });
        // send_if_modified always runs the closure
        result.unwrap_or_else(|| unreachable!("registry modification closure did not run"))
    }

    pub(crate) fn clear_error(&self) {
        self.modify(|state| (state.last_error.take().is_some(), ()));
    }

    pub(crate) fn record_error(&self, error: &SyncError) {
        let message = error.to_string();
        self.modify(|state| {
            state.last_error = Some(message);
            (true, ())
        });
    }

    /// Register a freshly created id. No snapshot entry is created.
    pub(crate) fn register_id(&self, id: &SimulationId) {
        self.modify(|state| {
            state.learn(id);
            state.phases.insert(id.clone(), SimulationPhase::Created);
            (true, ())
        });
    }

    /// Replace the id list wholesale; entries for ids no longer listed are dropped.
    pub(crate) fn replace_ids(&self, ids: &[SimulationId]) {
        let floor = self.last_ticket();
        self.modify(|state| {
            let mut listed = Vec::with_capacity(ids.len());
            for id in ids {
                if !listed.contains(id) {
                    listed.push(id.clone());
                }
            }

            let vanished: Vec<_> =
                state.simulation_ids.iter().filter(|id| !listed.contains(id)).cloned().collect();
            for id in &vanished {
                state.forget(id, floor);
            }
            for id in &listed {
                state.tombstones.remove(id);
                state.phases.entry(id.clone()).or_insert(SimulationPhase::Created);
            }
            debug!(listed = listed.len(), dropped = vanished.len(), "Replaced simulation ids");
            state.simulation_ids = listed;
            (true, ())
        });
    }

    /// Store a snapshot unless it is stale or its id was deleted.
    pub(crate) fn apply_snapshot(
        &self,
        id: &SimulationId,
        model: SimulationModel,
        ticket: u64,
        source: SnapshotSource,
    ) -> ApplyOutcome {
        self.modify(|state| {
            if state.tombstones.contains(id) {
                trace!(%id, ticket, "Dropping snapshot for deleted simulation");
                return (false, ApplyOutcome::Dropped);
            }
            if state.ticket_floors.get(id).is_some_and(|&floor| ticket <= floor) {
                trace!(%id, ticket, "Discarding snapshot requested before a delete");
                return (false, ApplyOutcome::Stale);
            }
            if let Some(existing) = state.simulations.get(id) {
                if existing.ticket >= ticket {
                    trace!(%id, ticket, stored = existing.ticket, "Discarding stale snapshot");
                    return (false, ApplyOutcome::Stale);
                }
            }

            state.learn(id);
            let phase = match (state.phases.get(id), model.running) {
                (Some(SimulationPhase::Running), false) => SimulationPhase::Completed,
                (Some(phase), _) => *phase,
                (None, true) => SimulationPhase::Running,
                (None, false) => SimulationPhase::Created,
            };
            state.phases.insert(id.clone(), phase);
            state
                .simulations
                .insert(id.clone(), RegistryEntry { model: Arc::new(model), ticket, source });
            (true, ApplyOutcome::Applied)
        })
    }

    /// Set the phase of a known id and report whether the id is known.
    ///
    /// Unknown or deleted ids are ignored. Setting the current phase again
    /// publishes nothing.
    pub(crate) fn set_phase(&self, id: &SimulationId, phase: SimulationPhase) -> bool {
        self.modify(|state| {
            if !state.contains(id) {
                return (false, false);
            }
            let previous = state.phases.insert(id.clone(), phase);
            (previous != Some(phase), true)
        })
    }

    /// Move a `Running` id to `phase`; other phases are left alone.
    pub(crate) fn finish_running(&self, id: &SimulationId, phase: SimulationPhase) {
        self.modify(|state| match state.phases.get_mut(id) {
            Some(current) if *current == SimulationPhase::Running => {
                *current = phase;
                (true, ())
            }
            _ => (false, ()),
        });
    }

    /// Forget an id and tombstone it against late writes.
    pub(crate) fn remove(&self, id: &SimulationId) {
        let floor = self.last_ticket();
        self.modify(|state| {
            state.forget(id, floor);
            (true, ())
        });
    }

    pub(crate) fn set_connection_status(&self, status: ConnectionStatus) {
        self.modify(|state| {
            let changed = state.connection_status != status;
            state.connection_status = status;
            (changed, ())
        });
    }
}
