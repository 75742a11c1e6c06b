//! Backend connectivity.
//!
//! Two independent mechanisms, either of which may be deployed:
//!
//! - [`LivenessMonitor`] pings the backend on demand or periodically and
//!   mirrors the result into the registry's connection status.
//! - [`EventChannel`] keeps a persistent duplex link open over a
//!   [`Transport`], with heartbeat, automatic reconnect and push updates.

pub mod channel;
pub mod liveness;
pub mod transport;

pub use channel::{ChannelMessage, EventChannel};
pub use liveness::{LivenessMonitor, PeriodicPing};
pub use transport::{OutboundSink, Transport, TransportLink, WebSocketTransport};
