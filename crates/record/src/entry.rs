// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Record-queue items. One entry per logical sample.

use bytes::Bytes;

/// One sample bound for a stream writer.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    pub uuid: String,
    /// Stream name; selects the writer and the output filename.
    pub name: String,
    pub data: RecordData,
}

impl RecordEntry {
    pub fn new(name: impl Into<String>, data: RecordData) -> Self {
        Self { uuid: uuid::Uuid::new_v4().to_string(), name: name.into(), data }
    }
}

/// Typed payloads, one per stream kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    /// One raw RGB8 frame.
    Video { frame: Bytes, width: u32, height: u32, fps: f64 },
    /// A block of interleaved PCM i16 samples (little-endian).
    Audio { samples: Bytes, channels: u16, sample_rate: u32 },
    /// One raw RGB8 image, written as a standalone file.
    Image { data: Bytes, width: u32, height: u32 },
    /// One JSON document, appended as a line.
    Json { value: serde_json::Value },
    /// One row; keys become the header on first write.
    Tabular { row: serde_json::Map<String, serde_json::Value> },
}

impl RecordData {
    pub fn dtype(&self) -> &'static str {
        match self {
            RecordData::Video { .. } => "video",
            RecordData::Audio { .. } => "audio",
            RecordData::Image { .. } => "image",
            RecordData::Json { .. } => "json",
            RecordData::Tabular { .. } => "tabular",
        }
    }
}
