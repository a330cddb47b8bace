// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types for the Trellis control plane.
//!
//! One tagged enum serves both the manager and worker buses. Serializes
//! with `{"type": "scope:name", ...fields}` format; unknown type tags
//! deserialize to `Custom`.

use crate::error::ErrorBody;
use crate::graph::NodeConfig;
use crate::state::{NodeState, PeerTable, WorkerState};
use crate::{NodeId, RequestId, WorkerId};
use serde::{Deserialize, Serialize};

/// Events that trigger state transitions in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- node lifecycle commands (worker bus) --
    #[serde(rename = "node:create")]
    NodeCreate { config: NodeConfig, request: RequestId },

    #[serde(rename = "node:destroy")]
    NodeDestroy { id: NodeId, request: RequestId },

    /// The merged peer table arrived; nodes connect their subscribers.
    #[serde(rename = "node:peers")]
    NodePeers { table: PeerTable, request: RequestId },

    #[serde(rename = "node:start")]
    NodeStart { request: RequestId },

    #[serde(rename = "node:record")]
    NodeRecord { request: RequestId },

    #[serde(rename = "node:step")]
    NodeStep { request: RequestId },

    #[serde(rename = "node:stop")]
    NodeStop { request: RequestId },

    /// Flush record queues, finalize writers, stage artifacts.
    #[serde(rename = "node:collect")]
    NodeCollect { request: RequestId },

    /// Advisory snapshot request of each node's latest value.
    #[serde(rename = "node:gather")]
    NodeGather { request: RequestId },

    /// Registered-method invocation, correlated by `request`.
    #[serde(rename = "node:method")]
    NodeMethod {
        node_id: NodeId,
        method: String,
        #[serde(default)]
        params: serde_json::Map<String, serde_json::Value>,
        #[serde(default)]
        timeout_ms: u64,
        request: RequestId,
    },

    // -- node reports --
    #[serde(rename = "node:status")]
    NodeStatus { state: NodeState },

    #[serde(rename = "node:failed")]
    NodeFailed { node_id: NodeId, detail: String },

    #[serde(rename = "node:method_result")]
    NodeMethodResult {
        node_id: NodeId,
        request: RequestId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "node:gather_report")]
    NodeGatherReport {
        node_id: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
    },

    /// Install uploaded user packages once their transfers complete.
    #[serde(rename = "package:load")]
    PackageLoad { packages: Vec<String>, request: RequestId },

    // -- command completion (acks awaited by the HTTP layer) --
    #[serde(rename = "command:done")]
    CommandDone {
        request: RequestId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
    },

    // -- worker membership (manager bus) --
    #[serde(rename = "worker:registered")]
    WorkerRegistered { state: WorkerState },

    #[serde(rename = "worker:deregistered")]
    WorkerDeregistered { id: WorkerId },

    /// Periodic WorkerState push so the manager tracks FSM changes
    /// between polls.
    #[serde(rename = "worker:heartbeat")]
    WorkerHeartbeat { state: WorkerState },

    // -- evented state --
    /// Published by the evented-state wrapper after every mutation.
    #[serde(rename = "state:changed")]
    StateChanged { class: String, snapshot: serde_json::Value },

    // -- session --
    #[serde(rename = "session:saved")]
    SessionSaved { session: String },

    // -- system --
    #[serde(rename = "system:shutdown")]
    Shutdown,

    /// Catch-all for unknown event types (extensibility)
    #[serde(other, skip_serializing)]
    Custom,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::NodeCreate { .. } => "node:create",
            Event::NodeDestroy { .. } => "node:destroy",
            Event::NodePeers { .. } => "node:peers",
            Event::NodeStart { .. } => "node:start",
            Event::NodeRecord { .. } => "node:record",
            Event::NodeStep { .. } => "node:step",
            Event::NodeStop { .. } => "node:stop",
            Event::NodeCollect { .. } => "node:collect",
            Event::NodeGather { .. } => "node:gather",
            Event::NodeMethod { .. } => "node:method",
            Event::NodeStatus { .. } => "node:status",
            Event::NodeFailed { .. } => "node:failed",
            Event::NodeMethodResult { .. } => "node:method_result",
            Event::NodeGatherReport { .. } => "node:gather_report",
            Event::PackageLoad { .. } => "package:load",
            Event::CommandDone { .. } => "command:done",
            Event::WorkerRegistered { .. } => "worker:registered",
            Event::WorkerDeregistered { .. } => "worker:deregistered",
            Event::WorkerHeartbeat { .. } => "worker:heartbeat",
            Event::StateChanged { .. } => "state:changed",
            Event::SessionSaved { .. } => "session:saved",
            Event::Shutdown => "system:shutdown",
            Event::Custom => "custom",
        }
    }

    /// One-line summary for structured logs.
    pub fn log_summary(&self) -> String {
        let t = self.name();
        match self {
            Event::NodeCreate { config, .. } => {
                format!("{t} kind={} name={}", config.spec.kind, config.spec.name)
            }
            Event::NodeDestroy { id, .. } => format!("{t} id={}", id.short(12)),
            Event::NodePeers { table, .. } => format!("{t} peers={}", table.len()),
            Event::NodeMethod { node_id, method, .. } => {
                format!("{t} node={} method={method}", node_id.short(12))
            }
            Event::NodeStatus { state } => {
                format!("{t} node={} fsm={}", state.id.short(12), state.fsm)
            }
            Event::NodeFailed { node_id, detail } => {
                format!("{t} node={} detail={detail}", node_id.short(12))
            }
            Event::NodeMethodResult { node_id, success, .. } => {
                format!("{t} node={} success={success}", node_id.short(12))
            }
            Event::CommandDone { request, success, .. } => {
                format!("{t} request={} success={success}", request.short(12))
            }
            Event::WorkerRegistered { state } => {
                format!("{t} worker={} name={}", state.id.short(12), state.name)
            }
            Event::WorkerDeregistered { id } => format!("{t} worker={}", id.short(12)),
            Event::WorkerHeartbeat { state } => {
                format!("{t} worker={} nodes={}", state.id.short(12), state.nodes.len())
            }
            Event::StateChanged { class, .. } => format!("{t} class={class}"),
            Event::SessionSaved { session } => format!("{t} session={session}"),
            _ => t.to_string(),
        }
    }

    /// The request id this event completes or carries, if any.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Event::NodeCreate { request, .. }
            | Event::NodeDestroy { request, .. }
            | Event::NodePeers { request, .. }
            | Event::NodeStart { request }
            | Event::NodeRecord { request }
            | Event::NodeStep { request }
            | Event::NodeStop { request }
            | Event::NodeCollect { request }
            | Event::NodeGather { request }
            | Event::NodeMethod { request, .. }
            | Event::NodeMethodResult { request, .. }
            | Event::PackageLoad { request, .. }
            | Event::CommandDone { request, .. } => Some(request),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
