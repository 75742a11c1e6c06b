//! Backend trait for simulation services

use serde_json::Value;

use crate::Result;
use crate::types::{SimulationId, SimulationModel, SimulationParameters};

/// Trait for the remote collision simulation service
///
/// Backends perform exactly one request per call and never retry. Success
/// payloads whose meaning is deployment-defined (acks for run, set-parameters
/// and delete) are returned as raw JSON.
///
/// All errors are reported as [`SyncError`](crate::SyncError):
/// - non-success status: `Request` with the status and a formatted message
/// - no response: `Network`
/// - malformed body: `Protocol`
#[async_trait::async_trait]
pub trait SimulationBackend: Send + Sync + 'static {
    /// Create a simulation and return the identifier assigned by the backend.
    async fn create(&self, parameters: &SimulationParameters) -> Result<SimulationId>;

    /// Start a simulation.
    async fn run(&self, id: &SimulationId) -> Result<Value>;

    /// Fetch the current snapshot of a simulation.
    async fn values(&self, id: &SimulationId) -> Result<SimulationModel>;

    /// List every identifier known to the backend.
    async fn ids(&self) -> Result<Vec<SimulationId>>;

    async fn set_parameters(
        &self,
        id: &SimulationId,
        parameters: &SimulationParameters,
    ) -> Result<Value>;

    async fn delete(&self, id: &SimulationId) -> Result<Value>;

    /// Lightweight liveness request; any success body is accepted.
    async fn ping(&self) -> Result<()>;
}

#[async_trait::async_trait]
impl<B: SimulationBackend + ?Sized> SimulationBackend for std::sync::Arc<B> {
    async fn create(&self, parameters: &SimulationParameters) -> Result<SimulationId> {
        (**self).create(parameters).await
    }

    async fn run(&self, id: &SimulationId) -> Result<Value> {
        (**self).run(id).await
    }

    async fn values(&self, id: &SimulationId) -> Result<SimulationModel> {
        (**self).values(id).await
    }

    async fn ids(&self) -> Result<Vec<SimulationId>> {
        (**self).ids().await
    }

    async fn set_parameters(
        &self,
        id: &SimulationId,
        parameters: &SimulationParameters,
    ) -> Result<Value> {
        (**self).set_parameters(id, parameters).await
    }

    async fn delete(&self, id: &SimulationId) -> Result<Value> {
        (**self).delete(id).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}
