// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tabular stream writer: append-only `{name}.csv` with the header taken
//! from the first row's keys.

use crate::entry::{RecordData, RecordEntry};
use crate::writer::{RecordWriter, WriterError};
use std::fs::{File, OpenOptions};
use std::path::Path;

pub struct TabularWriter {
    name: String,
    out: Option<csv::Writer<File>>,
    columns: Option<Vec<String>>,
}

impl TabularWriter {
    pub fn create(dir: &Path, name: &str) -> Result<Self, WriterError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{name}.csv")))?;
        Ok(Self {
            name: name.to_string(),
            out: Some(csv::WriterBuilder::new().has_headers(false).from_writer(file)),
            columns: None,
        })
    }
}

fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl RecordWriter for TabularWriter {
    fn append(&mut self, entry: &RecordEntry) -> Result<(), WriterError> {
        let out = self.out.as_mut().ok_or(WriterError::Closed)?;
        let RecordData::Tabular { row } = &entry.data else {
            return Err(WriterError::DtypeMismatch {
                name: self.name.clone(),
                expected: "tabular",
                got: entry.data.dtype(),
            });
        };
        let columns = match &self.columns {
            Some(cols) => cols,
            None => {
                let cols: Vec<String> = row.keys().cloned().collect();
                out.write_record(&cols).map_err(|e| WriterError::Encode(e.to_string()))?;
                self.columns = Some(cols);
                match &self.columns {
                    Some(cols) => cols,
                    None => return Err(WriterError::Closed),
                }
            }
        };
        let record: Vec<String> = columns
            .iter()
            .map(|col| row.get(col).map(cell).unwrap_or_default())
            .collect();
        out.write_record(&record).map_err(|e| WriterError::Encode(e.to_string()))?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriterError> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
            out.into_inner()
                .map_err(|e| WriterError::Encode(e.to_string()))?
                .sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tabular_tests.rs"]
mod tests;
