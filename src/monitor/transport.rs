//! Duplex text transports for the event channel

use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt, future};
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, trace};

use crate::{Result, SyncError};

/// Outbound half of a link.
pub type OutboundSink = Pin<Box<dyn Sink<String, Error = SyncError> + Send>>;

/// One established connection, split into its two halves.
///
/// The inbound stream ending (or yielding an error) means the link dropped.
pub struct TransportLink {
    pub outbound: OutboundSink,
    pub inbound: BoxStream<'static, Result<String>>,
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}

/// Trait for opening event channel links
///
/// A transport only establishes links; reconnecting, heartbeats and message
/// dispatch belong to [`EventChannel`](super::EventChannel).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, address: &str) -> Result<TransportLink>;
}

/// WebSocket transport; text frames carry the JSON payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, address: &str) -> Result<TransportLink> {
        let (socket, response) = connect_async(address).await.map_err(|e| {
            SyncError::network_failed_with_source(
                format!("cannot open event channel at {address}"),
                Box::new(e),
            )
        })?;
        debug!(address, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = socket.split();

        let outbound = write
            .with(|text: String| future::ready(Ok::<_, tungstenite::Error>(Message::Text(text))))
            .sink_map_err(|e| {
                SyncError::network_failed_with_source("event channel send failed", Box::new(e))
            });

        let inbound = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        trace!("Ignoring non UTF-8 binary frame");
                        None
                    }
                },
                // Control frames are answered by tungstenite itself
                Ok(_) => None,
                Err(e) => Some(Err(SyncError::network_failed_with_source(
                    "event channel receive failed",
                    Box::new(e),
                ))),
            })
        });

        Ok(TransportLink { outbound: Box::pin(outbound), inbound: inbound.boxed() })
    }
}
