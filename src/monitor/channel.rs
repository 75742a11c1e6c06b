//! Persistent event channel with heartbeat and automatic reconnect

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::transport::{Transport, TransportLink};
use crate::config::ChannelConfig;
use crate::poller::check_period;
use crate::registry::{ApplyOutcome, SimulationRegistry, SnapshotSource};
use crate::types::{ChannelStatus, ConnectionStatus, SimulationId, SimulationModel};
use crate::{Result, SyncError};

/// Outbound command payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct ChannelMessage {
    pub action: String,
    pub parameters: Vec<Value>,
}

impl ChannelMessage {
    pub fn new(action: impl Into<String>) -> Self {
        Self { action: action.into(), parameters: Vec::new() }
    }

    pub fn with_parameters(action: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self { action: action.into(), parameters }
    }
}

#[derive(Debug)]
enum Command {
    Send(String),
    Reconnect(String),
    Close,
}

/// Delay before reconnect attempt `attempt` (0-based): doubles up to 32x `base`.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(5))
}

/// Handle to a running event channel.
///
/// The channel task owns the link. It reconnects forever after a drop, sends
/// the heartbeat message at a fixed interval while open, and applies inbound
/// simulation updates to the registry like pulled snapshots. Dropping the
/// handle stops the task.
pub struct EventChannel {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ChannelStatus>,
    address: watch::Receiver<String>,
    last_sent: Mutex<Option<String>>,
    cancel: CancellationToken,
    exited: CancellationToken,
}

impl EventChannel {
    /// Start connecting to `config.address` in the background.
    ///
    /// Fails with [`SyncError::InvalidArgument`] if the heartbeat interval or
    /// the reconnect backoff is zero.
    pub fn spawn<T: Transport>(
        transport: T,
        config: ChannelConfig,
        registry: SimulationRegistry,
    ) -> Result<Self> {
        check_period("heartbeat interval", config.heartbeat_interval())?;
        check_period("reconnect backoff", config.reconnect_backoff())?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Closed);
        let (address_tx, address_rx) = watch::channel(config.address.clone());
        let cancel = CancellationToken::new();
        let exited = CancellationToken::new();

        let task = ChannelTask {
            transport,
            registry,
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_message: config.heartbeat_message.clone(),
            reconnect_backoff: config.reconnect_backoff(),
            commands: commands_rx,
            status: status_tx,
            address: address_tx,
            cancel: cancel.clone(),
        };

        let task_exited = exited.clone();
        tokio::spawn(async move {
            task.run().await;
            task_exited.cancel();
        });

        Ok(Self {
            commands: commands_tx,
            status: status_rx,
            address: address_rx,
            last_sent: Mutex::new(None),
            cancel,
            exited,
        })
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change.
    pub fn status_watch(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    pub fn address(&self) -> String {
        self.address.borrow().clone()
    }

    /// Last text accepted by [`send_text`](Self::send_text).
    pub fn last_sent(&self) -> Option<String> {
        self.last_sent.lock().ok().and_then(|last| last.clone())
    }

    /// Queue raw text for sending.
    ///
    /// Only effective while the channel is open; otherwise the text is dropped
    /// and `false` is returned.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        if !self.status().is_open() {
            debug!(status = ?self.status(), "Channel not open, dropping outbound message");
            return false;
        }
        if self.commands.send(Command::Send(text.clone())).is_err() {
            return false;
        }
        if let Ok(mut last) = self.last_sent.lock() {
            *last = Some(text);
        }
        true
    }

    pub fn send(&self, message: &ChannelMessage) -> Result<bool> {
        Ok(self.send_text(serde_json::to_string(message)?))
    }

    /// Send `{"action": action, "parameters": []}`.
    pub fn send_command(&self, action: &str) -> Result<bool> {
        self.send(&ChannelMessage::new(action))
    }

    /// Close the current link and connect to `address` instead.
    pub fn reconnect(&self, address: &str) -> Result<()> {
        let url = Url::parse(address).map_err(|e| {
            SyncError::invalid_argument(format!("invalid event channel address '{address}': {e}"))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SyncError::invalid_argument(format!(
                "event channel address must use ws or wss, got '{address}'"
            )));
        }
        self.commands
            .send(Command::Reconnect(address.to_string()))
            .map_err(|_| SyncError::network_failed("event channel is closed"))
    }

    /// Close the channel for good and wait for the task to exit.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close);
        self.exited.cancelled().await;
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Outcome of one connection attempt.
enum Opening {
    Connected(Result<TransportLink>),
    Redirect(String),
    Stop,
}

/// How a link ended.
enum LinkEnd {
    Dropped(SyncError),
    Reconnect(String),
    Closed,
}

struct ChannelTask<T> {
    transport: T,
    registry: SimulationRegistry,
    heartbeat_interval: Duration,
    heartbeat_message: String,
    reconnect_backoff: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ChannelStatus>,
    address: watch::Sender<String>,
    cancel: CancellationToken,
}

impl<T: Transport> ChannelTask<T> {
    fn set_status(&self, status: ChannelStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn switch_address(&self, address: String) {
        info!(%address, "Switching event channel address");
        self.address.send_replace(address);
    }

    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            let address = self.address.borrow().clone();
            self.set_status(ChannelStatus::Opening);
            debug!(%address, attempt, "Opening event channel");

            let connected = match self.open(&address).await {
                Opening::Connected(result) => result,
                Opening::Redirect(next) => {
                    self.switch_address(next);
                    attempt = 0;
                    continue;
                }
                Opening::Stop => break,
            };

            let end = match connected {
                Ok(link) => {
                    attempt = 0;
                    self.set_status(ChannelStatus::Open);
                    self.registry.set_connection_status(ConnectionStatus::Connected);
                    info!(%address, "Event channel open");

                    let end = self.drive(link).await;
                    self.registry.set_connection_status(ConnectionStatus::Disconnected);
                    end
                }
                Err(e) => LinkEnd::Dropped(e),
            };
            self.set_status(ChannelStatus::Closed);

            match end {
                LinkEnd::Closed => break,
                LinkEnd::Reconnect(next) => {
                    self.switch_address(next);
                    attempt = 0;
                }
                LinkEnd::Dropped(error) => {
                    let delay = backoff_delay(self.reconnect_backoff, attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(error = %error, ?delay, attempt, "Event channel down, reconnecting");
                    self.registry.record_error(&error);

                    if !self.wait_backoff(delay, &mut attempt).await {
                        break;
                    }
                }
            }
        }

        self.set_status(ChannelStatus::Closed);
        info!("Event channel task stopped");
    }

    /// Wait for the transport, dropping sends queued meanwhile.
    async fn open(&mut self, address: &str) -> Opening {
        let connect = self.transport.connect(address);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Opening::Stop,
                command = self.commands.recv() => match command {
                    Some(Command::Send(_)) => trace!("Dropping message queued before the channel opened"),
                    Some(Command::Reconnect(next)) => return Opening::Redirect(next),
                    Some(Command::Close) | None => return Opening::Stop,
                },
                result = &mut connect => return Opening::Connected(result),
            }
        }
    }

    /// Sleep before the next attempt. Returns `false` if the channel should stop.
    async fn wait_backoff(&mut self, delay: Duration, attempt: &mut u32) -> bool {
        let deadline = sleep(delay);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut deadline => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect(next)) => {
                        self.switch_address(next);
                        *attempt = 0;
                        return true;
                    }
                    Some(Command::Send(_)) => trace!("Dropping message while reconnecting"),
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    async fn drive(&mut self, link: TransportLink) -> LinkEnd {
        let TransportLink { mut outbound, mut inbound } = link;
        let mut heartbeat =
            interval_at(Instant::now() + self.heartbeat_interval, self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break LinkEnd::Closed,
                _ = heartbeat.tick() => {
                    trace!("Sending heartbeat");
                    if let Err(e) = outbound.send(self.heartbeat_message.clone()).await {
                        break LinkEnd::Dropped(e);
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Err(e) = outbound.send(text).await {
                            break LinkEnd::Dropped(e);
                        }
                    }
                    Some(Command::Reconnect(next)) => break LinkEnd::Reconnect(next),
                    Some(Command::Close) | None => break LinkEnd::Closed,
                },
                message = inbound.next() => match message {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(e)) => break LinkEnd::Dropped(e),
                    None => break LinkEnd::Dropped(SyncError::network_failed("event channel closed by peer")),
                },
            }
        };

        if !matches!(end, LinkEnd::Dropped(_)) {
            self.set_status(ChannelStatus::Closing);
            if let Err(e) = outbound.close().await {
                debug!(error = %e, "Event channel did not close cleanly");
            }
        }
        end
    }

    /// Apply one inbound payload.
    fn dispatch(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                debug!(message = text, "Ignoring non-JSON event channel message");
                return;
            }
        };

        match parse_update(value) {
            Ok((id, model)) => {
                let ticket = self.registry.issue_ticket();
                match self.registry.apply_snapshot(&id, model, ticket, SnapshotSource::Push) {
                    ApplyOutcome::Applied => debug!(%id, ticket, "Applied pushed snapshot"),
                    outcome => debug!(%id, ?outcome, "Pushed snapshot not applied"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Rejected event channel message");
                self.registry.record_error(&e);
            }
        }
    }
}

/// Decode a pushed update: a simulation snapshot carrying its `id`.
pub(crate) fn parse_update(value: Value) -> Result<(SimulationId, SimulationModel)> {
    const CONTEXT: &str = "event channel";
    let id = match value.get("id") {
        Some(id) => SimulationId::deserialize(id)
            .map_err(|e| SyncError::protocol_error(CONTEXT, format!("invalid id: {e}")))?,
        None => {
            return Err(SyncError::protocol_error(CONTEXT, "message is not a simulation update"));
        }
    };
    id.validate().map_err(|e| SyncError::protocol_error(CONTEXT, e.to_string()))?;

    let model = SimulationModel::deserialize(value)
        .map_err(|e| SyncError::protocol_error(CONTEXT, e.to_string()))?;
    model.validate()?;
    Ok((id, model))
}
