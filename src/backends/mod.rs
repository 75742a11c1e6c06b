//! Concrete [`SimulationBackend`](crate::SimulationBackend) implementations.

pub mod http;

pub use http::HttpBackend;
