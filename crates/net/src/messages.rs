// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire messages for the WebSocket channels.
//!
//! Three vocabularies share the `{"type": "scope:name"}` envelope: the
//! register/ack handshake every socket starts with, the node→worker report
//! stream, and the manager→UI status stream.

use serde::{Deserialize, Serialize};
use trellis_core::{ErrorBody, ManagerState, NodeFsm, NodeId, NodeState, RequestId};

/// Socket-level control frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsControl {
    /// First frame on every connection: the sender identifies itself.
    #[serde(rename = "ws:register")]
    Register { id: String },
    /// Server acknowledgement of a register frame.
    #[serde(rename = "ws:ack")]
    Ack { server_id: String },
}

/// Node → Worker report stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeMessage {
    /// Periodic NodeState snapshot.
    #[serde(rename = "node:status")]
    Status { state: NodeState },

    /// Advisory gather report — the node's latest output value.
    #[serde(rename = "node:report_gather")]
    ReportGather {
        node_id: NodeId,
        fsm: NodeFsm,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        latest_value: Option<serde_json::Value>,
    },

    /// Registered-method return, correlated by request id.
    #[serde(rename = "node:report_results")]
    ReportResults {
        node_id: NodeId,
        request: RequestId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The node's record task flushed; `ranges` is the per-stream
    /// `{name: {dtype, start_time, end_time}}` map.
    #[serde(rename = "node:report_collected")]
    ReportCollected { node_id: NodeId, ranges: serde_json::Value },

    /// Unrecoverable node failure.
    #[serde(rename = "node:report_failed")]
    ReportFailed { node_id: NodeId, detail: String },
}

/// Manager → UI status stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UiMessage {
    /// Single-node delta.
    #[serde(rename = "manager:node_status_update")]
    NodeStatusUpdate { state: NodeState },

    /// Full ManagerState snapshot.
    #[serde(rename = "manager:network_status_update")]
    NetworkStatusUpdate { state: ManagerState },

    /// Application-level failure surfaced on the socket.
    #[serde(rename = "error")]
    Error { payload: ErrorBody },
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
