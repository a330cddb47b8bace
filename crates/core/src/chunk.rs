// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data chunks — the unit of exchange on the node-to-node data plane.
//!
//! Wire format: a 4-byte big-endian header length, a bincode header naming
//! each payload entry with its content type and byte length, then the raw
//! value bytes concatenated in header order. Decoding slices the incoming
//! buffer, so image-sized payloads are never copied.

use crate::NodeId;
use bytes::{BufMut, Bytes, BytesMut};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content type of one payload entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Audio,
    Tensor,
    #[default]
    Other,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Audio => "audio",
            ContentType::Tensor => "tensor",
            ContentType::Other => "other",
        })
    }
}

/// One named value inside a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    pub content_type: ContentType,
    pub value: Bytes,
}

/// A sample produced by one `step` of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChunk {
    pub owner_id: NodeId,
    pub owner_name: String,
    pub timestamp_ms: u64,
    pub payload: IndexMap<String, ChunkEntry>,
}

/// Errors from chunk encoding and decoding.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("chunk header: {0}")]
    Header(String),
    #[error("entry {name:?} is not valid UTF-8")]
    NotText { name: String },
    #[error("entry {name:?} is not valid JSON: {detail}")]
    NotJson { name: String, detail: String },
}

#[derive(Serialize, Deserialize)]
struct WireHeader {
    owner_id: String,
    owner_name: String,
    timestamp_ms: u64,
    entries: Vec<WireEntry>,
}

#[derive(Serialize, Deserialize)]
struct WireEntry {
    name: String,
    content_type: ContentType,
    len: u64,
}

impl DataChunk {
    pub fn new(owner_id: NodeId, owner_name: impl Into<String>, timestamp_ms: u64) -> Self {
        Self { owner_id, owner_name: owner_name.into(), timestamp_ms, payload: IndexMap::new() }
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        content_type: ContentType,
        value: Bytes,
    ) -> &mut Self {
        self.payload.insert(name.into(), ChunkEntry { content_type, value });
        self
    }

    pub fn insert_text(&mut self, name: impl Into<String>, text: &str) -> &mut Self {
        self.insert(name, ContentType::Text, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Serialize an arbitrary JSON value under `other`.
    pub fn insert_json(
        &mut self,
        name: impl Into<String>,
        value: &serde_json::Value,
    ) -> &mut Self {
        let raw = serde_json::to_vec(value).unwrap_or_default();
        self.insert(name, ContentType::Other, Bytes::from(raw))
    }

    pub fn get(&self, name: &str) -> Option<&ChunkEntry> {
        self.payload.get(name)
    }

    pub fn text(&self, name: &str) -> Result<&str, ChunkError> {
        let entry = self
            .payload
            .get(name)
            .ok_or_else(|| ChunkError::NotText { name: name.to_string() })?;
        std::str::from_utf8(&entry.value)
            .map_err(|_| ChunkError::NotText { name: name.to_string() })
    }

    pub fn json(&self, name: &str) -> Result<serde_json::Value, ChunkError> {
        let entry = self
            .payload
            .get(name)
            .ok_or_else(|| ChunkError::NotJson { name: name.to_string(), detail: "missing".into() })?;
        serde_json::from_slice(&entry.value)
            .map_err(|e| ChunkError::NotJson { name: name.to_string(), detail: e.to_string() })
    }

    pub fn encode(&self) -> Result<Bytes, ChunkError> {
        let header = WireHeader {
            owner_id: self.owner_id.to_string(),
            owner_name: self.owner_name.clone(),
            timestamp_ms: self.timestamp_ms,
            entries: self
                .payload
                .iter()
                .map(|(name, e)| WireEntry {
                    name: name.clone(),
                    content_type: e.content_type,
                    len: e.value.len() as u64,
                })
                .collect(),
        };
        let header_bytes =
            bincode::serialize(&header).map_err(|e| ChunkError::Header(e.to_string()))?;
        let body_len: usize = self.payload.values().map(|e| e.value.len()).sum();
        let mut buf = BytesMut::with_capacity(4 + header_bytes.len() + body_len);
        buf.put_u32(header_bytes.len() as u32);
        buf.put_slice(&header_bytes);
        for entry in self.payload.values() {
            buf.put_slice(&entry.value);
        }
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, ChunkError> {
        if buf.len() < 4 {
            return Err(ChunkError::Truncated { need: 4, have: buf.len() });
        }
        let len_bytes = buf.split_to(4);
        let header_len =
            u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        if buf.len() < header_len {
            return Err(ChunkError::Truncated { need: header_len, have: buf.len() });
        }
        let header_bytes = buf.split_to(header_len);
        let header: WireHeader = bincode::deserialize(&header_bytes)
            .map_err(|e| ChunkError::Header(e.to_string()))?;
        let mut payload = IndexMap::with_capacity(header.entries.len());
        for entry in header.entries {
            let len = entry.len as usize;
            if buf.len() < len {
                return Err(ChunkError::Truncated { need: len, have: buf.len() });
            }
            let value = buf.split_to(len);
            payload.insert(entry.name, ChunkEntry { content_type: entry.content_type, value });
        }
        Ok(Self {
            owner_id: NodeId::from_string(header.owner_id),
            owner_name: header.owner_name,
            timestamp_ms: header.timestamp_ms,
            payload,
        })
    }
}

#[cfg(test)]
#[path = "chunk_tests.rs"]
mod tests;
