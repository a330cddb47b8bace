// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON stream writer: one document per line, appended to `{name}.jsonl`.

use crate::entry::{RecordData, RecordEntry};
use crate::writer::{RecordWriter, WriterError};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct JsonWriter {
    name: String,
    out: Option<BufWriter<File>>,
}

impl JsonWriter {
    pub fn create(dir: &Path, name: &str) -> Result<Self, WriterError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{name}.jsonl")))?;
        Ok(Self { name: name.to_string(), out: Some(BufWriter::new(file)) })
    }
}

impl RecordWriter for JsonWriter {
    fn append(&mut self, entry: &RecordEntry) -> Result<(), WriterError> {
        let out = self.out.as_mut().ok_or(WriterError::Closed)?;
        let RecordData::Json { value } = &entry.data else {
            return Err(WriterError::DtypeMismatch {
                name: self.name.clone(),
                expected: "json",
                got: entry.data.dtype(),
            });
        };
        serde_json::to_writer(&mut *out, value).map_err(|e| WriterError::Encode(e.to_string()))?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriterError> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "json_tests.rs"]
mod tests;
