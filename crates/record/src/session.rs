// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session metadata persisted as `meta.json` in the session directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::writer::WriterError;

/// Time span of one recorded stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRange {
    pub dtype: String,
    pub start_time: u64,
    pub end_time: u64,
}

/// `{id, subsessions, records: {session: {name: range}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionMeta {
    pub id: String,
    #[serde(default)]
    pub subsessions: Vec<String>,
    #[serde(default)]
    pub records: BTreeMap<String, BTreeMap<String, RecordRange>>,
}

impl SessionMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), subsessions: Vec::new(), records: BTreeMap::new() }
    }

    /// Merge one subsession's stream ranges.
    pub fn add_records(
        &mut self,
        session: impl Into<String>,
        ranges: BTreeMap<String, RecordRange>,
    ) {
        let session = session.into();
        if !self.subsessions.contains(&session) {
            self.subsessions.push(session.clone());
        }
        self.records.entry(session).or_default().extend(ranges);
    }

    pub fn load(dir: &Path) -> Result<Self, WriterError> {
        let raw = std::fs::read(dir.join("meta.json"))?;
        serde_json::from_slice(&raw).map_err(|e| WriterError::Encode(e.to_string()))
    }

    pub fn save(&self, dir: &Path) -> Result<(), WriterError> {
        std::fs::create_dir_all(dir)?;
        let raw = serde_json::to_vec_pretty(self).map_err(|e| WriterError::Encode(e.to_string()))?;
        std::fs::write(dir.join("meta.json"), raw)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
