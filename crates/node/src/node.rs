// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The user-facing node contract.

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use thiserror::Error;
use trellis_core::{ChunkEntry, ContentType, DataChunk, RegisteredMethod};
use trellis_record::{RecordData, RecordEntry};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("setup: {0}")]
    Setup(String),
    #[error("step: {0}")]
    Step(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("method: {0}")]
    Method(String),
    #[error("bad params: {0}")]
    BadParams(String),
}

/// Latest chunk per upstream node name, handed to `step`.
pub type StepInputs = IndexMap<String, DataChunk>;

/// What one `step` produced: payload entries to publish, plus any samples
/// bound for the record queue (only consumed while `RECORDING`).
#[derive(Debug, Default)]
pub struct StepOutput {
    pub payload: IndexMap<String, ChunkEntry>,
    pub records: Vec<RecordEntry>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, name: impl Into<String>, text: &str) -> Self {
        self.payload.insert(
            name.into(),
            ChunkEntry {
                content_type: ContentType::Text,
                value: Bytes::copy_from_slice(text.as_bytes()),
            },
        );
        self
    }

    pub fn with_entry(
        mut self,
        name: impl Into<String>,
        content_type: ContentType,
        value: Bytes,
    ) -> Self {
        self.payload.insert(name.into(), ChunkEntry { content_type, value });
        self
    }

    pub fn save_video(mut self, name: &str, frame: Bytes, width: u32, height: u32, fps: f64) -> Self {
        self.records.push(RecordEntry::new(name, RecordData::Video { frame, width, height, fps }));
        self
    }

    pub fn save_audio(
        mut self,
        name: &str,
        samples: Bytes,
        channels: u16,
        sample_rate: u32,
    ) -> Self {
        self.records
            .push(RecordEntry::new(name, RecordData::Audio { samples, channels, sample_rate }));
        self
    }

    pub fn save_image(mut self, name: &str, data: Bytes, width: u32, height: u32) -> Self {
        self.records.push(RecordEntry::new(name, RecordData::Image { data, width, height }));
        self
    }

    pub fn save_json(mut self, name: &str, value: serde_json::Value) -> Self {
        self.records.push(RecordEntry::new(name, RecordData::Json { value }));
        self
    }

    pub fn save_tabular(
        mut self,
        name: &str,
        row: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.records.push(RecordEntry::new(name, RecordData::Tabular { row }));
        self
    }
}

/// A pipeline vertex.
///
/// The registered-method table is explicit: `method_specs` declares names,
/// parameter hints, and concurrency styles; `invoke` executes one. The
/// runner enforces the style semantics, so implementations just do the
/// work.
#[async_trait]
pub trait Node: Send + Sync {
    /// Once, before anything else; transitions the node to `INITIALIZED`.
    async fn setup(&mut self) -> Result<(), NodeError>;

    /// Repeatedly while running: once per fresh upstream delivery, or once
    /// per tick for source nodes (`inputs` is `None`). Returning `None`
    /// publishes nothing.
    async fn step(&mut self, inputs: Option<StepInputs>) -> Result<Option<StepOutput>, NodeError>;

    /// Once, before `SHUTDOWN`.
    async fn teardown(&mut self);

    fn method_specs(&self) -> BTreeMap<String, RegisteredMethod> {
        BTreeMap::new()
    }

    async fn invoke(
        &mut self,
        method: &str,
        _params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, NodeError> {
        Err(NodeError::UnknownMethod(method.to_string()))
    }
}
