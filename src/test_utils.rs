//! Test doubles for the backend and the event channel transport
//!
//! [`ScriptedBackend`] answers from per-operation queues and records every call;
//! [`MemoryTransport`] hands out in-memory links whose far ends are controlled
//! by the test through [`MemoryServer`].

#![cfg(any(test, feature = "benchmark"))]

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::backend::SimulationBackend;
use crate::monitor::{Transport, TransportLink};
use crate::types::{Frame, SimulationId, SimulationModel, SimulationParameters};
use crate::{Result, SyncError};

/// Snapshot with one enabled Mioty chain of two frames, the second lost in a collision.
pub fn sample_model(running: bool) -> SimulationModel {
    serde_json::from_value(sample_payload(running)).expect("sample payload is valid")
}

/// Backend JSON for [`sample_model`]: every fragment listed, each successor also nested under `next`.
pub fn sample_payload(running: bool) -> Value {
    json!({
        "simulationRunning": running,
        "simulationMessagePerSecond": 2,
        "MiotyModelRun": true,
        "MiotyFrames": [
            {
                "channel": 1, "group": 0, "usStart": 0, "usEnd": 400,
                "collision": false, "lost": false, "first": true,
                "next": {
                    "channel": 4, "group": 0, "usStart": 400, "usEnd": 800,
                    "collision": true, "lost": true, "first": false, "next": null
                }
            },
            {
                "channel": 4, "group": 0, "usStart": 400, "usEnd": 800,
                "collision": true, "lost": true, "first": false, "next": null
            }
        ],
        "SigfoxModelRun": false,
        "SigfoxFrames": [],
        "LoRaWanRun": false,
        "LoRaWanFrames": []
    })
}

/// `count` running snapshots followed by one finished snapshot.
pub fn running_then_finished(count: usize) -> Vec<Reply<SimulationModel>> {
    let mut replies: Vec<_> = (0..count).map(|_| Ok(sample_model(true))).collect();
    replies.push(Ok(sample_model(false)));
    replies
}

/// Flat arena of `chains` chains, each `chain_len` frames long.
pub fn synthetic_frames(chains: usize, chain_len: usize) -> Vec<Frame> {
    let mut frames = Vec::with_capacity(chains * chain_len);
    for chain in 0..chains {
        let base = chain * chain_len;
        for position in 0..chain_len {
            let start = (position as i64) * 1_000;
            frames.push(Frame {
                channel: (chain % 8) as i64,
                group: chain as i64,
                start_us: start,
                end_us: start + 750,
                collision: (chain + position) % 3 == 0,
                lost: chain % 5 == 0,
                first: position == 0,
                next: (position + 1 < chain_len).then_some(base + position + 1),
            });
        }
    }
    frames
}

/// Canned failure returned by [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Non-success HTTP status
    Status(u16),
    /// No response at all
    Network,
    /// Response body with the wrong shape
    Malformed,
}

impl Failure {
    fn into_error(self, label: &str) -> SyncError {
        match self {
            Failure::Status(status) => SyncError::request_failed(
                status,
                format!("{label}: {status} - details unavailable"),
            ),
            Failure::Network => SyncError::network_failed(format!("{label}: connection refused")),
            Failure::Malformed => SyncError::protocol_error(label, "unexpected response body"),
        }
    }
}

pub type Reply<T> = std::result::Result<T, Failure>;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create,
    Run(SimulationId),
    Values(SimulationId),
    Ids,
    SetParameters(SimulationId),
    Delete(SimulationId),
    Ping,
}

#[derive(Default)]
struct Script {
    create: VecDeque<Reply<SimulationId>>,
    run: VecDeque<Reply<Value>>,
    values: HashMap<SimulationId, VecDeque<Reply<SimulationModel>>>,
    ids: VecDeque<Reply<Vec<SimulationId>>>,
    set_parameters: VecDeque<Reply<Value>>,
    delete: VecDeque<Reply<Value>>,
    ping: VecDeque<Reply<()>>,
    gates: HashMap<SimulationId, Arc<Notify>>,
}

/// In-memory backend answering from queued replies.
///
/// Unscripted calls succeed with neutral answers: `create` hands out
/// increasing numeric ids, acks are `{}`, `ids` is empty and `ping` succeeds.
/// `values` for an id is the exception: it fails with 404 unless scripted, and
/// its last scripted reply repeats so a steady backend state can be modelled.
pub struct ScriptedBackend {
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicI64,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        f(&mut self.script.lock().expect("script lock poisoned"))
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("call log poisoned").push(call);
    }

    pub fn script_create(&self, reply: Reply<SimulationId>) -> &Self {
        self.with_script(|s| s.create.push_back(reply));
        self
    }

    pub fn script_run(&self, reply: Reply<Value>) -> &Self {
        self.with_script(|s| s.run.push_back(reply));
        self
    }

    pub fn script_values(
        &self,
        id: impl Into<SimulationId>,
        replies: impl IntoIterator<Item = Reply<SimulationModel>>,
    ) -> &Self {
        let id = id.into();
        self.with_script(|s| s.values.entry(id).or_default().extend(replies));
        self
    }

    pub fn script_ids(&self, reply: Reply<Vec<SimulationId>>) -> &Self {
        self.with_script(|s| s.ids.push_back(reply));
        self
    }

    pub fn script_set_parameters(&self, reply: Reply<Value>) -> &Self {
        self.with_script(|s| s.set_parameters.push_back(reply));
        self
    }

    pub fn script_delete(&self, reply: Reply<Value>) -> &Self {
        self.with_script(|s| s.delete.push_back(reply));
        self
    }

    pub fn script_ping(&self, reply: Reply<()>) -> &Self {
        self.with_script(|s| s.ping.push_back(reply));
        self
    }

    /// Hold every `values` call for `id` until the returned gate is notified,
    /// once per call.
    pub fn gate_values(&self, id: impl Into<SimulationId>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        let id = id.into();
        self.with_script(|s| s.gates.insert(id, Arc::clone(&gate)));
        gate
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().expect("call log poisoned").iter().filter(|c| predicate(c)).count()
    }

    pub fn values_calls(&self, id: &SimulationId) -> usize {
        self.count(|call| matches!(call, Call::Values(called) if called == id))
    }
}

fn answer<T>(queue: &mut VecDeque<Reply<T>>, label: &str, default: impl FnOnce() -> T) -> Result<T> {
    match queue.pop_front() {
        Some(reply) => reply.map_err(|f| f.into_error(label)),
        None => Ok(default()),
    }
}

#[async_trait::async_trait]
impl SimulationBackend for ScriptedBackend {
    async fn create(&self, _parameters: &SimulationParameters) -> Result<SimulationId> {
        self.record(Call::Create);
        let next = &self.next_id;
        self.with_script(|s| {
            answer(&mut s.create, "create simulation", || {
                SimulationId::Number(next.fetch_add(1, Ordering::Relaxed))
            })
        })
    }

    async fn run(&self, id: &SimulationId) -> Result<Value> {
        self.record(Call::Run(id.clone()));
        self.with_script(|s| answer(&mut s.run, "run simulation", || json!({})))
    }

    async fn values(&self, id: &SimulationId) -> Result<SimulationModel> {
        self.record(Call::Values(id.clone()));
        let gate = self.with_script(|s| s.gates.get(id).cloned());
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.with_script(|s| {
            let queue = s.values.entry(id.clone()).or_default();
            let reply = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
            match reply {
                Some(reply) => reply.map_err(|f| f.into_error("fetch values")),
                None => Err(Failure::Status(404).into_error("fetch values")),
            }
        })
    }

    async fn ids(&self) -> Result<Vec<SimulationId>> {
        self.record(Call::Ids);
        self.with_script(|s| answer(&mut s.ids, "list ids", Vec::new))
    }

    async fn set_parameters(
        &self,
        id: &SimulationId,
        _parameters: &SimulationParameters,
    ) -> Result<Value> {
        self.record(Call::SetParameters(id.clone()));
        self.with_script(|s| answer(&mut s.set_parameters, "set parameters", || json!({})))
    }

    async fn delete(&self, id: &SimulationId) -> Result<Value> {
        self.record(Call::Delete(id.clone()));
        self.with_script(|s| answer(&mut s.delete, "delete simulation", || json!({})))
    }

    async fn ping(&self) -> Result<()> {
        self.record(Call::Ping);
        self.with_script(|s| answer(&mut s.ping, "ping", || ()))
    }
}

/// Far end of one in-memory link.
pub struct MemoryPeer {
    pub address: String,
    /// Messages the client sent
    pub sent: mpsc::UnboundedReceiver<String>,
    /// Messages to deliver to the client; dropping it drops the link
    pub push: mpsc::UnboundedSender<Result<String>>,
}

impl MemoryPeer {
    pub async fn deliver(&mut self, text: impl Into<String>) {
        let _ = self.push.send(Ok(text.into())).await;
    }

    /// Next message the client sent, or `None` once the client side closed.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.next().await
    }
}

/// Test side of a [`MemoryTransport`].
pub struct MemoryServer {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicUsize>,
}

impl MemoryServer {
    /// Wait for the client to open its next link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.next().await
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Connection attempts seen so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Transport whose links are in-memory channel pairs.
pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicUsize>,
}

impl MemoryTransport {
    /// A transport and the server side that observes its links.
    pub fn pair() -> (Self, MemoryServer) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded();
        let attempts = Arc::new(AtomicUsize::new(0));
        let refuse = Arc::new(AtomicUsize::new(0));
        let transport = Self {
            accepted: accepted_tx,
            attempts: Arc::clone(&attempts),
            refuse: Arc::clone(&refuse),
        };
        (transport, MemoryServer { accepted: accepted_rx, attempts, refuse })
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, address: &str) -> Result<TransportLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(SyncError::network_failed(format!("connection to {address} refused")));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded::<String>();
        let (push_tx, push_rx) = mpsc::unbounded::<Result<String>>();

        self.accepted
            .unbounded_send(MemoryPeer { address: address.to_string(), sent: sent_rx, push: push_tx })
            .map_err(|_| SyncError::network_failed("memory server dropped"))?;

        let outbound = sent_tx.sink_map_err(|e| SyncError::network_failed(format!("peer gone: {e}")));
        Ok(TransportLink { outbound: Box::pin(outbound), inbound: push_rx.boxed() })
    }
}
