// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The node's channel back to its worker.
//!
//! Thread-mode nodes report through an in-process channel; process-mode
//! nodes serialize the same reports as `NodeMessage` frames over the
//! worker's WebSocket.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use trellis_core::{NodeFsm, NodeId, NodeState, RequestId};
use trellis_net::{NodeMessage, WsClient};
use trellis_record::RecordRange;

/// One report from a node, as consumed by the worker's NodeHandler.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Status(NodeState),
    Gather { node_id: NodeId, fsm: NodeFsm, latest_value: Option<serde_json::Value> },
    Results {
        node_id: NodeId,
        request: RequestId,
        success: bool,
        output: Option<serde_json::Value>,
        error: Option<String>,
    },
    Collected { node_id: NodeId, ranges: BTreeMap<String, RecordRange> },
    Failed { node_id: NodeId, detail: String },
}

/// Where a runner sends its reports.
#[async_trait]
pub trait WorkerLink: Send + Sync {
    async fn report(&self, event: LinkEvent);
}

/// In-process link for thread-mode nodes.
pub struct ChannelLink {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl ChannelLink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl WorkerLink for ChannelLink {
    async fn report(&self, event: LinkEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("worker link dropped, report lost");
        }
    }
}

/// WebSocket link for process-mode nodes.
pub struct WsLink {
    client: WsClient,
}

impl WsLink {
    pub fn new(client: WsClient) -> Self {
        Self { client }
    }
}

fn to_message(event: LinkEvent) -> Option<NodeMessage> {
    Some(match event {
        LinkEvent::Status(state) => NodeMessage::Status { state },
        LinkEvent::Gather { node_id, fsm, latest_value } => {
            NodeMessage::ReportGather { node_id, fsm, latest_value }
        }
        LinkEvent::Results { node_id, request, success, output, error } => {
            NodeMessage::ReportResults { node_id, request, success, output, error }
        }
        LinkEvent::Collected { node_id, ranges } => NodeMessage::ReportCollected {
            node_id,
            ranges: serde_json::to_value(ranges).unwrap_or(serde_json::Value::Null),
        },
        LinkEvent::Failed { node_id, detail } => NodeMessage::ReportFailed { node_id, detail },
    })
}

#[async_trait]
impl WorkerLink for WsLink {
    async fn report(&self, event: LinkEvent) {
        let Some(message) = to_message(event) else {
            return;
        };
        match serde_json::to_value(&message) {
            Ok(frame) => {
                if !self.client.send(frame) {
                    tracing::warn!("ws link closed, report lost");
                }
            }
            Err(e) => tracing::warn!(error = %e, "report serialize failed"),
        }
    }
}

/// Parse a worker-received WS frame back into a link event.
pub fn link_event_from_frame(value: &serde_json::Value) -> Option<LinkEvent> {
    let message: NodeMessage = serde_json::from_value(value.clone()).ok()?;
    Some(match message {
        NodeMessage::Status { state } => LinkEvent::Status(state),
        NodeMessage::ReportGather { node_id, fsm, latest_value } => {
            LinkEvent::Gather { node_id, fsm, latest_value }
        }
        NodeMessage::ReportResults { node_id, request, success, output, error } => {
            LinkEvent::Results { node_id, request, success, output, error }
        }
        NodeMessage::ReportCollected { node_id, ranges } => LinkEvent::Collected {
            node_id,
            ranges: serde_json::from_value(ranges).unwrap_or_default(),
        },
        NodeMessage::ReportFailed { node_id, detail } => LinkEvent::Failed { node_id, detail },
    })
}

#[cfg(test)]
#[path = "link_tests.rs"]
mod tests;
