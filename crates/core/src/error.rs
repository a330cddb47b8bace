// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds shared across the control plane.
//!
//! Application-level failures travel over HTTP as a 200 with
//! `{success: false, error: {kind, message, details}}`; only genuine
//! server faults use 5xx.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a graph commit failed.
#[derive(Debug, Clone, Error)]
pub enum CommitError {
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),
    #[error("worker {worker} unreachable: {detail}")]
    WorkerUnreachable { worker: String, detail: String },
    #[error("node {node} did not reach INITIALIZED in time")]
    SpawnTimeout { node: NodeId },
    #[error("node {node} did not connect its peers in time")]
    PeerConnectTimeout { node: NodeId },
    /// A reset arrived while the commit was in flight.
    #[error("commit cancelled")]
    Cancelled,
}

impl CommitError {
    pub fn reason(&self) -> &'static str {
        match self {
            CommitError::InvalidMapping(_) => "invalid-mapping",
            CommitError::WorkerUnreachable { .. } => "worker-unreachable",
            CommitError::SpawnTimeout { .. } => "spawn-timeout",
            CommitError::PeerConnectTimeout { .. } => "peer-connect-timeout",
            CommitError::Cancelled => "cancelled",
        }
    }
}

/// A lifecycle command failed on a specific node.
#[derive(Debug, Clone, Error)]
#[error("{op} failed on node {node_id}: {reason}")]
pub struct LifecycleError {
    pub op: String,
    pub node_id: NodeId,
    pub reason: String,
}

/// An operation ran out of time. Leaves affected state where it got to.
#[derive(Debug, Clone, Error)]
#[error("{op} timed out after {elapsed_ms}ms")]
pub struct TimeoutError {
    pub op: String,
    pub elapsed_ms: u64,
}

/// A transport-level failure talking to a peer.
#[derive(Debug, Clone, Error)]
#[error("transport error with {peer}: {detail}")]
pub struct TransportError {
    pub peer: String,
    pub detail: String,
}

/// A malformed or unserviceable request on a route.
#[derive(Debug, Clone, Error)]
#[error("protocol error on {route}: {detail}")]
pub struct ProtocolError {
    pub route: String,
    pub detail: String,
}

/// A configuration key problem.
#[derive(Debug, Clone, Error)]
#[error("config key {key}: {detail}")]
pub struct ConfigError {
    pub key: String,
    pub detail: String,
}

/// The error shape surfaced to HTTP and WS clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl ErrorBody {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into(), details: serde_json::Value::Null }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

impl From<&CommitError> for ErrorBody {
    fn from(e: &CommitError) -> Self {
        ErrorBody::new("commit-error", e.to_string())
            .with_details(serde_json::json!({ "reason": e.reason() }))
    }
}

impl From<&LifecycleError> for ErrorBody {
    fn from(e: &LifecycleError) -> Self {
        ErrorBody::new("lifecycle-error", e.to_string())
            .with_details(serde_json::json!({ "op": e.op, "node_id": e.node_id }))
    }
}

impl From<&TimeoutError> for ErrorBody {
    fn from(e: &TimeoutError) -> Self {
        ErrorBody::new("timeout-error", e.to_string())
            .with_details(serde_json::json!({ "op": e.op, "elapsed_ms": e.elapsed_ms }))
    }
}

impl From<&TransportError> for ErrorBody {
    fn from(e: &TransportError) -> Self {
        ErrorBody::new("transport-error", e.to_string())
    }
}

impl From<&ProtocolError> for ErrorBody {
    fn from(e: &ProtocolError) -> Self {
        ErrorBody::new("protocol-error", e.to_string())
    }
}

impl From<&ConfigError> for ErrorBody {
    fn from(e: &ConfigError) -> Self {
        ErrorBody::new("config-error", e.to_string())
    }
}

/// Standard HTTP response envelope.
///
/// `value` rides under the `return` key to match the registered-method
/// result shape consumed by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, rename = "return", skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self { success: true, value: None, error: None }
    }

    pub fn ok_with(value: serde_json::Value) -> Self {
        Self { success: true, value: Some(value), error: None }
    }

    pub fn err(error: ErrorBody) -> Self {
        Self { success: false, value: None, error: Some(error) }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
