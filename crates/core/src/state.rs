// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster state snapshots: node, worker, and manager.
//!
//! These are the shapes that travel over the control plane and out to UI
//! clients. Mutation happens only on the owning process's loop; everyone
//! else sees serialized snapshots.

use crate::fsm::NodeFsm;
use crate::{ManagerId, NodeId, WorkerId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Concurrency style of a registered method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MethodStyle {
    /// Runs without quiescing the stepping schedule.
    #[default]
    Concurrent,
    /// Serialized against `step` and all other methods on the node.
    Blocking,
    /// Blocking semantics plus a mandatory FSM reset to `READY` after return.
    Reset,
}

impl std::fmt::Display for MethodStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MethodStyle::Concurrent => "concurrent",
            MethodStyle::Blocking => "blocking",
            MethodStyle::Reset => "reset",
        })
    }
}

/// A method a node exposes for out-of-band invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RegisteredMethod {
    /// Parameter name → type hint (display only, not enforced).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub style: MethodStyle,
}

/// Snapshot of a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    /// Publisher port (0 until the node has bound one).
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub fsm: NodeFsm,
    #[serde(default)]
    pub registered_methods: BTreeMap<String, RegisteredMethod>,
}

impl NodeState {
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            port: 0,
            fsm: NodeFsm::Null,
            registered_methods: BTreeMap::new(),
        }
    }
}

/// Snapshot of a worker and the nodes it hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    pub id: WorkerId,
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub nodes: IndexMap<NodeId, NodeState>,
}

impl WorkerState {
    pub fn new(id: WorkerId, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), ip: String::new(), port: 0, nodes: IndexMap::new() }
    }

    /// True when every hosted node is in `fsm` (vacuously true with no nodes).
    pub fn all_nodes_in(&self, fsm: NodeFsm) -> bool {
        self.nodes.values().all(|n| n.fsm == fsm)
    }
}

/// Snapshot of the whole cluster, owned by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerState {
    pub id: ManagerId,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub workers: BTreeMap<WorkerId, WorkerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_subscription_port: Option<u16>,
    #[serde(default)]
    pub log_sink_enabled: bool,
    #[serde(default)]
    pub logdir: PathBuf,
}

impl ManagerState {
    pub fn new(id: ManagerId, logdir: PathBuf) -> Self {
        Self {
            id,
            ip: String::new(),
            port: 0,
            workers: BTreeMap::new(),
            logs_subscription_port: None,
            log_sink_enabled: false,
            logdir,
        }
    }

    /// Locate the worker hosting a node.
    pub fn worker_for_node(&self, node_id: &NodeId) -> Option<&WorkerState> {
        self.workers.values().find(|w| w.nodes.contains_key(node_id))
    }

    /// JSON snapshot as sent in `NETWORK_STATUS_UPDATE` frames.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Address a node's subscribers use to reach its publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub host: String,
    pub port: u16,
}

/// The global peer table: node id → publisher address.
///
/// Each worker produces a fragment for its own nodes; the manager merges
/// fragments and broadcasts the whole table. A node holds a superset of
/// the peers it actually subscribes to and ignores the extras.
pub type PeerTable = BTreeMap<NodeId, PeerEntry>;

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
