// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker's central subsystem: spawns, supervises, and commands nodes.
//!
//! Lifecycle routes publish events on the worker bus; this service
//! observes them, performs the operation, and acknowledges with a
//! `command:done` event the HTTP layer awaits. Every node runs a
//! [`NodeRunner`] on its own loop thread; its reports are ingested here
//! and folded into the shared `WorkerState`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use trellis_core::{
    ErrorBody, Event, NodeConfig, NodeFsm, NodeId, PeerEntry, PeerTable, RequestId, Settings,
    SystemClock, WorkerState,
};
use trellis_node::{ChannelLink, LinkEvent, NodeCommand, NodeRegistry, NodeRunner, RunnerConfig};
use trellis_record::RecordRange;
use trellis_runtime::{AsyncLoopThread, EventBus, Service, ServiceError};

/// How commands reach a node: an in-process channel for thread-mode
/// nodes, or the worker WebSocket for subordinate processes.
enum NodeChannel {
    Local(mpsc::UnboundedSender<NodeCommand>),
    Remote,
}

struct NodeSlot {
    channel: NodeChannel,
    config: NodeConfig,
    loop_thread: Option<AsyncLoopThread>,
    child: Option<tokio::process::Child>,
}

/// Callback sending a frame to a registered WS peer (set by the HTTP
/// service once the server is bound).
pub type WsSend = Arc<dyn Fn(&str, &serde_json::Value) -> bool + Send + Sync>;

type MethodReply = (bool, Option<serde_json::Value>, Option<String>);

/// State shared with the per-node ingest tasks.
struct Shared {
    state: Arc<Mutex<WorkerState>>,
    bus: EventBus,
    gathers: Mutex<HashMap<NodeId, Option<serde_json::Value>>>,
    collected: Mutex<BTreeMap<String, RecordRange>>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<MethodReply>>>,
}

impl Shared {
    /// Fold one node report into worker state and the bus.
    fn apply_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Status(node_state) => {
                tracing::debug!(node = %node_state.id, fsm = %node_state.fsm, "node status");
                self.state.lock().nodes.insert(node_state.id, node_state.clone());
                self.bus.publish(Event::NodeStatus { state: node_state });
            }
            LinkEvent::Gather { node_id, latest_value, .. } => {
                self.gathers.lock().insert(node_id, latest_value.clone());
                self.bus.publish(Event::NodeGatherReport { node_id, value: latest_value });
            }
            LinkEvent::Results { node_id, request, success, output, error } => {
                if let Some(reply) = self.pending.lock().remove(&request) {
                    let _ = reply.send((success, output.clone(), error.clone()));
                }
                self.bus.publish(Event::NodeMethodResult {
                    node_id,
                    request,
                    success,
                    output,
                    error,
                });
            }
            LinkEvent::Collected { ranges, .. } => {
                self.collected.lock().extend(ranges);
            }
            LinkEvent::Failed { node_id, detail } => {
                tracing::warn!(node = %node_id, %detail, "node failed");
                self.bus.publish(Event::NodeFailed { node_id, detail });
            }
        }
    }
}

pub struct NodeHandler {
    shared: Arc<Shared>,
    registry: NodeRegistry,
    settings: Settings,
    record_dir: PathBuf,
    nodes: Mutex<HashMap<NodeId, NodeSlot>>,
    /// Where process-node runner configs are written before spawn.
    spawn_dir: PathBuf,
    ws_send: Mutex<Option<WsSend>>,
    ws_url: Mutex<Option<String>>,
}

impl NodeHandler {
    pub fn new(
        state: Arc<Mutex<WorkerState>>,
        bus: EventBus,
        registry: NodeRegistry,
        settings: Settings,
        record_dir: PathBuf,
        spawn_dir: PathBuf,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state,
                bus,
                gathers: Mutex::new(HashMap::new()),
                collected: Mutex::new(BTreeMap::new()),
                pending: Mutex::new(HashMap::new()),
            }),
            registry,
            settings,
            record_dir,
            nodes: Mutex::new(HashMap::new()),
            spawn_dir,
            ws_send: Mutex::new(None),
            ws_url: Mutex::new(None),
        }
    }

    /// Wire the WS control path once the HTTP server is bound.
    pub fn attach_ws(&self, url: String, send: WsSend) {
        *self.ws_url.lock() = Some(url);
        *self.ws_send.lock() = Some(send);
    }

    /// Ingest a report arriving over the worker WebSocket (process-mode
    /// nodes use the same path as in-process channels).
    pub fn ingest_ws_report(&self, event: LinkEvent) {
        self.shared.apply_link_event(event);
    }

    /// Publish the `command:done` acknowledgement for `request`.
    fn ack(&self, request: RequestId, result: Result<Option<serde_json::Value>, ErrorBody>) {
        let event = match result {
            Ok(value) => Event::CommandDone { request, success: true, error: None, value },
            Err(error) => {
                Event::CommandDone { request, success: false, error: Some(error), value: None }
            }
        };
        self.shared.bus.publish(event);
    }

    fn fsm_of(&self, id: &NodeId) -> Option<NodeFsm> {
        self.shared.state.lock().nodes.get(id).map(|n| n.fsm)
    }

    /// Poll until `pred` holds over the worker state, or time out.
    async fn wait_nodes(
        &self,
        pred: impl Fn(&WorkerState) -> bool,
        timeout: Duration,
        op: &str,
    ) -> Result<(), ErrorBody> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if pred(&self.shared.state.lock()) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ErrorBody::new(
                    "timeout-error",
                    format!("{op} timed out after {}ms", timeout.as_millis()),
                ));
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Spawn a node — on its own loop thread, or as a subordinate process
    /// when `params.process` is set — and wait for `INITIALIZED`.
    pub async fn create_node(&self, config: NodeConfig) -> Result<(), ErrorBody> {
        let id = config.spec.id;
        if self.nodes.lock().contains_key(&id) {
            // Idempotent: re-creating an existing node is a no-op.
            return Ok(());
        }
        let process_mode = config.spec.params.get("process").and_then(|v| v.as_bool())
            == Some(true);
        let runner_config = RunnerConfig {
            config: config.clone(),
            settings: self.settings.clone(),
            record_dir: self.record_dir.clone(),
        };

        let slot = if process_mode {
            let child = self.spawn_process_node(&config, &runner_config).await?;
            NodeSlot { channel: NodeChannel::Remote, config, loop_thread: None, child: Some(child) }
        } else {
            let node = self
                .registry
                .build(&config.spec)
                .map_err(|e| ErrorBody::new("lifecycle-error", e.to_string()))?;
            let loop_thread = AsyncLoopThread::new(format!("node-{}", config.spec.name))
                .map_err(|e| ErrorBody::new("lifecycle-error", e.to_string()))?;
            let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
            let (link, link_rx) = ChannelLink::new();
            let runner =
                NodeRunner::new(node, runner_config, ctrl_rx, Arc::new(link), SystemClock);
            loop_thread.exec(runner.run());
            spawn_ingest(Arc::clone(&self.shared), id, link_rx);
            NodeSlot {
                channel: NodeChannel::Local(ctrl_tx),
                config,
                loop_thread: Some(loop_thread),
                child: None,
            }
        };
        self.nodes.lock().insert(id, slot);

        let timeout = self.settings.node_creation_timeout();
        let result = self
            .wait_nodes(
                |state| state.nodes.get(&id).is_some_and(|n| n.fsm == NodeFsm::Initialized),
                timeout,
                "node-creation",
            )
            .await;
        if result.is_err() {
            tracing::error!(node = %id, "node did not reach INITIALIZED, reaping");
            self.reap(&id);
            return Err(ErrorBody::new("commit-error", "spawn timeout")
                .with_details(serde_json::json!({ "reason": "spawn-timeout", "node": id })));
        }
        Ok(())
    }

    /// Launch `trellis node-host` for one node. The child connects back
    /// over the worker WebSocket; kind resolution happens in the child's
    /// own registry, so only registry-known kinds are spawnable.
    async fn spawn_process_node(
        &self,
        config: &NodeConfig,
        runner_config: &RunnerConfig,
    ) -> Result<tokio::process::Child, ErrorBody> {
        if !self.registry.contains(&config.spec.kind) {
            return Err(ErrorBody::new(
                "lifecycle-error",
                format!("unknown node kind: {}", config.spec.kind),
            ));
        }
        let ws_url = self.ws_url.lock().clone().ok_or_else(|| {
            ErrorBody::new("lifecycle-error", "worker socket not ready for process nodes")
        })?;
        tokio::fs::create_dir_all(&self.spawn_dir)
            .await
            .map_err(|e| ErrorBody::new("lifecycle-error", e.to_string()))?;
        let config_path = self.spawn_dir.join(format!("{}.json", config.spec.id));
        let raw = serde_json::to_vec(runner_config)
            .map_err(|e| ErrorBody::new("lifecycle-error", e.to_string()))?;
        tokio::fs::write(&config_path, raw)
            .await
            .map_err(|e| ErrorBody::new("lifecycle-error", e.to_string()))?;

        let exe = std::env::current_exe()
            .map_err(|e| ErrorBody::new("lifecycle-error", e.to_string()))?;
        tokio::process::Command::new(exe)
            .arg("node-host")
            .arg("--worker-url")
            .arg(&ws_url)
            .arg("--config-file")
            .arg(&config_path)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ErrorBody::new("lifecycle-error", format!("spawn failed: {e}")))
    }

    fn reap(&self, id: &NodeId) {
        if let Some(mut slot) = self.nodes.lock().remove(id) {
            if let Some(mut loop_thread) = slot.loop_thread.take() {
                loop_thread.stop();
            }
            if let Some(mut child) = slot.child.take() {
                terminate_child(&mut child);
            }
        }
        self.shared.state.lock().nodes.shift_remove(id);
    }

    fn send_command(&self, id: &NodeId, slot: &NodeSlot, command: &NodeCommand) -> bool {
        match &slot.channel {
            NodeChannel::Local(ctrl) => ctrl.send(command.clone()).is_ok(),
            NodeChannel::Remote => {
                let sender = self.ws_send.lock().clone();
                match (sender, serde_json::to_value(command)) {
                    (Some(send), Ok(frame)) => send(id.as_str(), &frame),
                    _ => false,
                }
            }
        }
    }

    pub async fn destroy_node(&self, id: NodeId) -> Result<(), ErrorBody> {
        let sent = {
            let nodes = self.nodes.lock();
            match nodes.get(&id) {
                Some(slot) => self.send_command(&id, slot, &NodeCommand::Shutdown),
                None => return Ok(()),
            }
        };
        if sent {
            let _ = self
                .wait_nodes(
                    |state| {
                        state.nodes.get(&id).map_or(true, |n| n.fsm == NodeFsm::Shutdown)
                    },
                    self.settings.lifecycle_timeout(),
                    "node-destroy",
                )
                .await;
        }
        self.reap(&id);
        Ok(())
    }

    /// Fragment of the global peer table for the nodes hosted here.
    pub fn local_server_data(&self) -> PeerTable {
        let state = self.shared.state.lock();
        let host = state.ip.clone();
        state
            .nodes
            .values()
            .map(|n| (n.id, PeerEntry { host: host.clone(), port: n.port }))
            .collect()
    }

    /// Forward the merged peer table; each node gets only the entries for
    /// its declared in-bound peers and connects its subscribers. Extra
    /// table entries are ignored.
    pub async fn process_node_server_data(&self, table: PeerTable) -> Result<(), ErrorBody> {
        let targets: Vec<(NodeId, Vec<(String, u16)>)> = {
            let nodes = self.nodes.lock();
            nodes
                .iter()
                .map(|(id, slot)| {
                    let peers = slot
                        .config
                        .in_bound
                        .iter()
                        .filter_map(|peer_id| table.get(peer_id))
                        .map(|entry| (entry.host.clone(), entry.port))
                        .collect();
                    (*id, peers)
                })
                .collect()
        };
        for (id, peers) in targets {
            self.send_to(&id, NodeCommand::ConnectPeers { peers });
        }
        self.wait_nodes(
            |state| state.nodes.values().all(|n| n.fsm.rank() >= NodeFsm::Connected.rank()),
            self.settings.lifecycle_timeout(),
            "peer-connect",
        )
        .await
    }

    fn send_to(&self, id: &NodeId, command: NodeCommand) {
        let nodes = self.nodes.lock();
        if let Some(slot) = nodes.get(id) {
            if !self.send_command(id, slot, &command) {
                tracing::warn!(node = %id, "control channel closed");
            }
        }
    }

    fn broadcast(&self, command: NodeCommand) {
        let nodes = self.nodes.lock();
        for (id, slot) in nodes.iter() {
            if !self.send_command(id, slot, &command) {
                tracing::warn!(node = %id, "control channel closed");
            }
        }
    }

    async fn broadcast_and_wait(
        &self,
        command: NodeCommand,
        fsm: NodeFsm,
    ) -> Result<(), ErrorBody> {
        let op = format!("lifecycle-{fsm}");
        self.broadcast(command);
        self.wait_nodes(
            |state| state.all_nodes_in(fsm),
            self.settings.lifecycle_timeout(),
            &op,
        )
        .await
    }

    pub async fn start_nodes(&self) -> Result<(), ErrorBody> {
        self.broadcast_and_wait(NodeCommand::Start, NodeFsm::Previewing).await
    }

    pub async fn record(&self) -> Result<(), ErrorBody> {
        self.broadcast_and_wait(NodeCommand::Record, NodeFsm::Recording).await
    }

    pub async fn stop_nodes(&self) -> Result<(), ErrorBody> {
        self.broadcast_and_wait(NodeCommand::Stop, NodeFsm::Stopped).await
    }

    pub fn step(&self) {
        self.broadcast(NodeCommand::Step);
    }

    /// Flush every record queue and finalize writers; returns the merged
    /// per-stream ranges for the session metadata.
    pub async fn collect(&self) -> Result<BTreeMap<String, RecordRange>, ErrorBody> {
        self.shared.collected.lock().clear();
        self.broadcast_and_wait(NodeCommand::Collect, NodeFsm::Saved).await?;
        Ok(self.shared.collected.lock().clone())
    }

    /// Best-effort gather sweep; advisory only.
    pub async fn gather(&self, grace: Duration) -> HashMap<NodeId, Option<serde_json::Value>> {
        self.shared.gathers.lock().clear();
        self.broadcast(NodeCommand::Gather);
        let expected = self.nodes.lock().len();
        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.shared.gathers.lock().len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.shared.gathers.lock().clone()
    }

    /// Dispatch a registered method and await its correlated result.
    pub async fn registered_method(
        &self,
        node_id: NodeId,
        method: String,
        params: serde_json::Map<String, serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ErrorBody> {
        if self.fsm_of(&node_id).is_none() {
            return Err(ErrorBody::new("lifecycle-error", format!("no such node: {node_id}")));
        }
        let request = RequestId::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.lock().insert(request, reply_tx);
        self.send_to(&node_id, NodeCommand::Method { name: method.clone(), params, request });

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok((true, output, _))) => Ok(output.unwrap_or(serde_json::Value::Null)),
            Ok(Ok((false, _, error))) => Err(ErrorBody::new(
                "lifecycle-error",
                error.unwrap_or_else(|| "method failed".to_string()),
            )),
            Ok(Err(_)) => Err(ErrorBody::new("lifecycle-error", "node dropped the request")),
            Err(_) => {
                self.shared.pending.lock().remove(&request);
                Err(ErrorBody::new(
                    "timeout-error",
                    format!("{method} timed out after {}ms", timeout.as_millis()),
                ))
            }
        }
    }

    pub async fn destroy_all(&self) {
        let ids: Vec<NodeId> = self.nodes.lock().keys().copied().collect();
        for id in ids {
            let _ = self.destroy_node(id).await;
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }
}

/// Subscribe the handler's command observers to the worker bus.
///
/// Each lifecycle event is performed here and acknowledged with a
/// `command:done` the HTTP layer awaits. Dispatch is serial on the bus
/// loop, so commands never interleave.
pub async fn subscribe_observers(
    handler: Arc<NodeHandler>,
    bus: &EventBus,
) -> Result<(), trellis_runtime::BusError> {
    spawn_child_supervisor(Arc::clone(&handler));
    macro_rules! observe {
        ($name:literal, $handler:ident, $event:pat => $body:expr) => {{
            let $handler = Arc::clone(&handler);
            bus.subscribe(trellis_runtime::TypedObserver::on($name, move |event| {
                let $handler = Arc::clone(&$handler);
                async move {
                    if let $event = event {
                        $body;
                    }
                    Ok(())
                }
            }))
            .await?;
        }};
    }

    observe!("node:create", h, Event::NodeCreate { config, request } => {
        let result = h.create_node(config).await;
        h.ack(request, result.map(|_| None));
    });
    observe!("node:destroy", h, Event::NodeDestroy { id, request } => {
        let result = h.destroy_node(id).await;
        h.ack(request, result.map(|_| None));
    });
    observe!("node:peers", h, Event::NodePeers { table, request } => {
        let result = h.process_node_server_data(table).await;
        h.ack(request, result.map(|_| None));
    });
    observe!("node:start", h, Event::NodeStart { request } => {
        let result = h.start_nodes().await;
        h.ack(request, result.map(|_| None));
    });
    observe!("node:record", h, Event::NodeRecord { request } => {
        let result = h.record().await;
        h.ack(request, result.map(|_| None));
    });
    observe!("node:step", h, Event::NodeStep { request } => {
        h.step();
        h.ack(request, Ok(None));
    });
    observe!("node:stop", h, Event::NodeStop { request } => {
        let result = h.stop_nodes().await;
        h.ack(request, result.map(|_| None));
    });
    observe!("node:collect", h, Event::NodeCollect { request } => {
        let result = h.collect().await;
        h.ack(
            request,
            result.map(|ranges| serde_json::to_value(ranges).ok()),
        );
    });
    observe!("node:gather", h, Event::NodeGather { request } => {
        let gathered = h.gather(Duration::from_secs(1)).await;
        let value: serde_json::Map<String, serde_json::Value> = gathered
            .into_iter()
            .map(|(id, v)| (id.to_string(), v.unwrap_or(serde_json::Value::Null)))
            .collect();
        h.ack(request, Ok(Some(serde_json::Value::Object(value))));
    });
    observe!("node:method", h, Event::NodeMethod { node_id, method, params, request, .. } => {
        // Fire-and-correlate: the result flows back as a
        // `node:method_result` event the HTTP layer awaits.
        h.send_to(&node_id, NodeCommand::Method { name: method, params, request });
    });
    Ok(())
}

/// Ask a process node's OS process to terminate: SIGTERM first, then a
/// hard kill after a grace period.
fn terminate_child(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
    let _ = child.start_kill();
}

/// Mark process nodes whose OS process died without reaching SHUTDOWN.
fn spawn_child_supervisor(handler: Arc<NodeHandler>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let dead: Vec<NodeId> = {
                let mut nodes = handler.nodes.lock();
                nodes
                    .iter_mut()
                    .filter_map(|(id, slot)| {
                        let child = slot.child.as_mut()?;
                        match child.try_wait() {
                            Ok(Some(_)) => Some(*id),
                            _ => None,
                        }
                    })
                    .collect()
            };
            for id in dead {
                let last = handler.shared.state.lock().nodes.get(&id).map(|n| n.fsm);
                handler.nodes.lock().remove(&id);
                if last.is_some() && last != Some(NodeFsm::Shutdown) {
                    tracing::warn!(node = %id, "node process died");
                    if let Some(node) = handler.shared.state.lock().nodes.get_mut(&id) {
                        node.fsm = NodeFsm::Shutdown;
                    }
                    handler.shared.bus.publish(Event::NodeFailed {
                        node_id: id,
                        detail: "node process terminated unexpectedly".to_string(),
                    });
                }
            }
        }
    });
}

/// Forward node reports into the shared ingest path, and supervise: a
/// runner that stops reporting without reaching SHUTDOWN died.
fn spawn_ingest(shared: Arc<Shared>, id: NodeId, mut link_rx: mpsc::UnboundedReceiver<LinkEvent>) {
    tokio::spawn(async move {
        while let Some(event) = link_rx.recv().await {
            shared.apply_link_event(event);
        }
        let last = shared.state.lock().nodes.get(&id).map(|n| n.fsm);
        if last.is_some() && last != Some(NodeFsm::Shutdown) {
            if let Some(node) = shared.state.lock().nodes.get_mut(&id) {
                node.fsm = NodeFsm::Shutdown;
            }
            shared.bus.publish(Event::NodeFailed {
                node_id: id,
                detail: "node terminated unexpectedly".to_string(),
            });
        }
    });
}

#[async_trait]
impl Service for NodeHandler {
    fn name(&self) -> &'static str {
        "node-handler"
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        self.destroy_all().await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "node_handler_tests.rs"]
mod tests;
