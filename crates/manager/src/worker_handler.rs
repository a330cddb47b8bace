// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cluster-wide lifecycle orchestrator.
//!
//! Owns worker registration and the commit/start/record/stop/collect/
//! reset protocol. Broadcasts iterate workers in id-sorted order for
//! determinism; a command completes only when every target node confirms
//! the expected state, and partial successes surface as such. Long
//! operations hold a cancellation token so a reset can interrupt a
//! commit at any phase boundary.

use crate::ManagerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trellis_core::{
    validate_mapping, CommitError, ErrorBody, Event, Graph, ManagerState, Mapping, NodeFsm,
    NodeId, PeerTable, Settings, WorkerId, WorkerState,
};
use trellis_net::HttpClient;
use trellis_runtime::{EventBus, Evented, Service, ServiceError};

/// A user package distributed to workers at commit time.
#[derive(Debug, Clone)]
pub struct PackageFile {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub packages: Vec<PackageFile>,
}

pub struct WorkerHandler {
    state: Evented<ManagerState>,
    bus: EventBus,
    settings: Settings,
    clients: Mutex<BTreeMap<WorkerId, HttpClient>>,
    committed: Mutex<Option<(Graph, Mapping)>>,
    commit_cancel: Mutex<Option<CancellationToken>>,
}

impl WorkerHandler {
    pub fn new(state: Evented<ManagerState>, bus: EventBus, settings: Settings) -> Self {
        Self {
            state,
            bus,
            settings,
            clients: Mutex::new(BTreeMap::new()),
            committed: Mutex::new(None),
            commit_cancel: Mutex::new(None),
        }
    }

    /// Register (or re-register) a worker. Idempotent by worker id.
    pub fn register_worker(&self, worker: WorkerState) {
        let client = HttpClient::new(&worker.ip, worker.port);
        self.clients.lock().insert(worker.id, client);
        let id = worker.id;
        self.state.mutate(|s| {
            s.workers.insert(id, worker);
        });
        tracing::info!(worker = %id, "worker registered");
    }

    pub fn deregister_worker(&self, id: WorkerId) {
        self.clients.lock().remove(&id);
        self.state.mutate(|s| {
            s.workers.remove(&id);
        });
        tracing::info!(worker = %id, "worker deregistered");
    }

    /// Fold a heartbeat snapshot in, publishing per-node deltas.
    pub fn heartbeat(&self, worker: WorkerState) {
        let changed: Vec<trellis_core::NodeState> = self.state.mutate(|s| {
            let previous = s.workers.insert(worker.id, worker.clone());
            worker
                .nodes
                .values()
                .filter(|node| {
                    previous
                        .as_ref()
                        .and_then(|p| p.nodes.get(&node.id))
                        .map(|p| p.fsm != node.fsm)
                        .unwrap_or(true)
                })
                .cloned()
                .collect()
        });
        for node in changed {
            self.bus.publish(Event::NodeStatus { state: node });
        }
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.clients.lock().keys().copied().collect()
    }

    fn client_for(&self, id: &WorkerId) -> Option<HttpClient> {
        self.clients.lock().get(id).cloned()
    }

    fn sorted_clients(&self) -> Vec<(WorkerId, HttpClient)> {
        self.clients.lock().iter().map(|(id, c)| (*id, c.clone())).collect()
    }

    /// Pull a fresh WorkerState snapshot from every worker.
    async fn refresh_workers(&self) {
        for (id, client) in self.sorted_clients() {
            match client.get_as::<WorkerState>("/state").await {
                Ok(snapshot) => self.heartbeat(snapshot),
                Err(e) => tracing::debug!(worker = %id, error = %e, "state refresh failed"),
            }
        }
    }

    /// Poll until every committed node satisfies `pred`.
    async fn poll_nodes(
        &self,
        pred: impl Fn(NodeFsm) -> bool,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), PollFailure> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(PollFailure::Cancelled);
            }
            self.refresh_workers().await;
            let lagging = self.state.read(|s| {
                s.workers
                    .values()
                    .flat_map(|w| w.nodes.values())
                    .find(|n| !pred(n.fsm))
                    .map(|n| n.id)
            });
            match lagging {
                None => return Ok(()),
                Some(node) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(PollFailure::Lagging(node));
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Commit a graph plus mapping: validate, distribute packages, create
    /// nodes, synchronize peer addresses, and poll the fleet to `READY`.
    pub async fn commit_graph(
        &self,
        graph: Graph,
        mapping: Mapping,
        options: CommitOptions,
    ) -> Result<(), CommitError> {
        graph.validate().map_err(|e| CommitError::InvalidMapping(e.to_string()))?;
        validate_mapping(&graph, &mapping).map_err(CommitError::InvalidMapping)?;
        for worker_id in mapping.keys() {
            if self.client_for(worker_id).is_none() {
                return Err(CommitError::InvalidMapping(format!(
                    "worker {worker_id} is not registered"
                )));
            }
        }

        let cancel = CancellationToken::new();
        *self.commit_cancel.lock() = Some(cancel.clone());
        let result = self.commit_inner(&graph, &mapping, &options, &cancel).await;
        *self.commit_cancel.lock() = None;

        if result.is_ok() {
            *self.committed.lock() = Some((graph, mapping));
        }
        result
    }

    async fn commit_inner(
        &self,
        graph: &Graph,
        mapping: &Mapping,
        options: &CommitOptions,
        cancel: &CancellationToken,
    ) -> Result<(), CommitError> {
        let check = || {
            if cancel.is_cancelled() {
                Err(CommitError::Cancelled)
            } else {
                Ok(())
            }
        };

        // Ship user packages ahead of node creation.
        if !options.packages.is_empty() {
            for (worker_id, _) in mapping.iter() {
                check()?;
                let client = self.require_client(worker_id)?;
                for package in &options.packages {
                    let content = tokio::fs::read(&package.path).await.map_err(|e| {
                        CommitError::InvalidMapping(format!(
                            "package {} unreadable: {e}",
                            package.name
                        ))
                    })?;
                    let response = client
                        .upload_file("manager", &package.name, &content)
                        .await
                        .map_err(|e| self.unreachable(worker_id, e))?;
                    if !response.success {
                        return Err(self.unreachable_msg(worker_id, "package upload refused"));
                    }
                }
                let names: Vec<&str> =
                    options.packages.iter().map(|p| p.name.as_str()).collect();
                let response = client
                    .post("/packages/load", &serde_json::json!({ "packages": names }))
                    .await
                    .map_err(|e| self.unreachable(worker_id, e))?;
                if !response.success {
                    return Err(self.unreachable_msg(worker_id, "package load refused"));
                }
            }
        }

        // Create every node, worker by worker in id order.
        for (worker_id, node_ids) in mapping.iter() {
            let client = self.require_client(worker_id)?;
            for node_id in node_ids {
                check()?;
                let Some(config) = graph.config_for(node_id) else {
                    return Err(CommitError::InvalidMapping(format!("unknown node {node_id}")));
                };
                let response = client
                    .post("/nodes/create", &config)
                    .await
                    .map_err(|e| self.unreachable(worker_id, e))?;
                if !response.success {
                    return Err(CommitError::SpawnTimeout { node: *node_id });
                }
            }
        }
        check()?;

        let commit_timeout = self.settings.commit_timeout();
        self.poll_nodes(|fsm| fsm.rank() >= NodeFsm::Initialized.rank(), commit_timeout, cancel)
            .await
            .map_err(|e| e.into_commit(|node| CommitError::SpawnTimeout { node }))?;

        // Merge every worker's peer fragment into the global table.
        let mut table = PeerTable::new();
        for (worker_id, client) in self.sorted_clients() {
            check()?;
            let fragment: serde_json::Value = client
                .get_as("/nodes/server_data")
                .await
                .map_err(|e| self.unreachable(&worker_id, e))?;
            let fragment: PeerTable =
                serde_json::from_value(fragment["node_server_data"].clone())
                    .unwrap_or_default();
            table.extend(fragment);
        }

        // Atomic broadcast: every node either receives the whole table or
        // the commit fails.
        for (worker_id, client) in self.sorted_clients() {
            check()?;
            let response = client
                .post("/nodes/server_data", &table)
                .await
                .map_err(|e| self.unreachable(&worker_id, e))?;
            if !response.success {
                let node = self
                    .state
                    .read(|s| s.workers.get(&worker_id).and_then(|w| w.nodes.keys().next().copied()))
                    .unwrap_or_default();
                return Err(CommitError::PeerConnectTimeout { node });
            }
        }

        self.poll_nodes(|fsm| fsm.rank() >= NodeFsm::Ready.rank(), commit_timeout, cancel)
            .await
            .map_err(|e| e.into_commit(|node| CommitError::PeerConnectTimeout { node }))?;

        tracing::info!(nodes = graph.len(), workers = mapping.len(), "graph committed");
        Ok(())
    }

    fn require_client(&self, id: &WorkerId) -> Result<HttpClient, CommitError> {
        self.client_for(id).ok_or_else(|| CommitError::InvalidMapping(format!(
            "worker {id} is not registered"
        )))
    }

    fn unreachable(&self, id: &WorkerId, e: trellis_core::TransportError) -> CommitError {
        CommitError::WorkerUnreachable { worker: id.to_string(), detail: e.detail }
    }

    fn unreachable_msg(&self, id: &WorkerId, detail: &str) -> CommitError {
        CommitError::WorkerUnreachable { worker: id.to_string(), detail: detail.to_string() }
    }

    /// Broadcast one lifecycle route and wait for the fleet to converge.
    async fn lifecycle(&self, op: &str, route: &str, fsm: NodeFsm) -> Result<(), ManagerError> {
        let clients = self.sorted_clients();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (worker_id, client) in clients {
            match client.post(route, &serde_json::json!({})).await {
                Ok(response) if response.success => succeeded.push(worker_id),
                Ok(response) => failed.push((
                    worker_id,
                    response
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "command failed".to_string()),
                )),
                Err(e) => failed.push((worker_id, e.detail)),
            }
        }
        if !failed.is_empty() {
            return Err(ManagerError::Partial { op: op.to_string(), succeeded, failed });
        }

        let cancel = CancellationToken::new();
        self.poll_nodes(|f| f == fsm, self.settings.lifecycle_timeout(), &cancel)
            .await
            .map_err(|e| match e {
                PollFailure::Lagging(node) => ManagerError::Partial {
                    op: op.to_string(),
                    succeeded: Vec::new(),
                    failed: vec![(
                        self.state
                            .read(|s| s.worker_for_node(&node).map(|w| w.id))
                            .unwrap_or_default(),
                        format!("node {node} never reached {fsm}"),
                    )],
                },
                PollFailure::Cancelled => ManagerError::Commit(CommitError::Cancelled),
            })?;
        tracing::info!(op, "lifecycle broadcast complete");
        Ok(())
    }

    pub async fn start_pipeline(&self) -> Result<(), ManagerError> {
        self.lifecycle("start", "/nodes/start", NodeFsm::Previewing).await
    }

    pub async fn record(&self) -> Result<(), ManagerError> {
        self.lifecycle("record", "/nodes/record", NodeFsm::Recording).await
    }

    pub async fn stop(&self) -> Result<(), ManagerError> {
        self.lifecycle("stop", "/nodes/stop", NodeFsm::Stopped).await
    }

    pub async fn collect(&self) -> Result<(), ManagerError> {
        self.lifecycle("collect", "/nodes/collect", NodeFsm::Saved).await
    }

    /// Return to a pristine state. Cancels any in-flight commit, destroys
    /// every node, and clears the graph; with `keep_workers` false the
    /// workers are disconnected too.
    pub async fn reset(&self, keep_workers: bool) -> Result<(), ManagerError> {
        let was_committing = {
            let cancel = self.commit_cancel.lock().take();
            match cancel {
                Some(cancel) => {
                    cancel.cancel();
                    true
                }
                None => false,
            }
        };
        *self.committed.lock() = None;

        // Two sweeps when a commit was in flight: a node whose creation
        // was still being acknowledged is invisible to the first one.
        let sweeps = if was_committing { 2 } else { 1 };
        for sweep in 0..sweeps {
            if sweep > 0 {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            for (worker_id, client) in self.sorted_clients() {
                // Ask the worker for its authoritative node list; manager
                // state may lag behind a cancelled commit.
                let node_ids: Vec<NodeId> = match client.get_as::<WorkerState>("/state").await {
                    Ok(snapshot) => snapshot.nodes.keys().copied().collect(),
                    Err(e) => {
                        tracing::warn!(worker = %worker_id, error = %e, "reset: state fetch failed");
                        self.state.read(|s| {
                            s.workers
                                .get(&worker_id)
                                .map(|w| w.nodes.keys().copied().collect())
                                .unwrap_or_default()
                        })
                    }
                };
                for node_id in node_ids {
                    if let Err(e) =
                        client.post("/nodes/destroy", &serde_json::json!({ "id": node_id })).await
                    {
                        tracing::warn!(worker = %worker_id, node = %node_id, error = %e, "destroy failed");
                    }
                }
                self.state.mutate(|s| {
                    if let Some(worker) = s.workers.get_mut(&worker_id) {
                        worker.nodes.clear();
                    }
                });
            }
        }

        if !keep_workers {
            for id in self.worker_ids() {
                self.deregister_worker(id);
            }
        }
        tracing::info!(keep_workers, "reset complete");
        Ok(())
    }

    /// Proxy a registered-method invocation to the owning worker.
    pub async fn request_registered_method(
        &self,
        node_id: NodeId,
        method: &str,
        params: serde_json::Map<String, serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ErrorBody> {
        let worker_id = self
            .state
            .read(|s| s.worker_for_node(&node_id).map(|w| w.id))
            .ok_or_else(|| {
                ErrorBody::new("lifecycle-error", format!("no worker hosts node {node_id}"))
            })?;
        let client = self
            .client_for(&worker_id)
            .ok_or_else(|| ErrorBody::new("transport-error", "worker client missing"))?;

        let body = serde_json::json!({
            "node_id": node_id,
            "method_name": method,
            "params": params,
            "timeout": timeout.as_secs_f64(),
        });
        let response = client
            .post("/nodes/registered_methods", &body)
            .await
            .map_err(|e| ErrorBody::from(&e))?;
        if response.success {
            Ok(response.value.unwrap_or(serde_json::Value::Null))
        } else {
            Err(response
                .error
                .unwrap_or_else(|| ErrorBody::new("lifecycle-error", "method failed")))
        }
    }

    /// Advisory gather sweep across the fleet.
    pub async fn gather(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut merged = serde_json::Map::new();
        for (worker_id, client) in self.sorted_clients() {
            match client.get_as::<trellis_core::ApiResponse>("/nodes/gather").await {
                Ok(response) => {
                    if let Some(serde_json::Value::Object(map)) = response.value {
                        merged.extend(map);
                    }
                }
                Err(e) => tracing::debug!(worker = %worker_id, error = %e, "gather failed"),
            }
        }
        merged
    }

    /// Ask every still-connected worker to shut down.
    pub async fn shutdown_workers(&self) {
        for (worker_id, client) in self.sorted_clients() {
            if let Err(e) = client.post("/shutdown", &serde_json::json!({})).await {
                tracing::debug!(worker = %worker_id, error = %e, "worker shutdown failed");
            }
        }
    }
}

enum PollFailure {
    Lagging(NodeId),
    Cancelled,
}

impl PollFailure {
    fn into_commit(self, lagging: impl FnOnce(NodeId) -> CommitError) -> CommitError {
        match self {
            PollFailure::Lagging(node) => lagging(node),
            PollFailure::Cancelled => CommitError::Cancelled,
        }
    }
}

#[async_trait]
impl Service for WorkerHandler {
    fn name(&self) -> &'static str {
        "worker-handler"
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        if let Some(cancel) = self.commit_cancel.lock().take() {
            cancel.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "worker_handler_tests.rs"]
mod tests;
