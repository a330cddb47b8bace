// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The writer contract and the dtype → writer factory.

use crate::audio::AudioWriter;
use crate::entry::{RecordData, RecordEntry};
use crate::image::ImageWriter;
use crate::json::JsonWriter;
use crate::tabular::TabularWriter;
use crate::video::VideoWriter;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode: {0}")]
    Encode(String),
    #[error("writer for {name} expects {expected} entries, got {got}")]
    DtypeMismatch { name: String, expected: &'static str, got: &'static str },
    #[error("writer already closed")]
    Closed,
}

/// A queue consumer for one stream.
///
/// Contract: accept one entry at a time; append-only; flush on `close()`;
/// durable at `close()`.
pub trait RecordWriter: Send {
    fn append(&mut self, entry: &RecordEntry) -> Result<(), WriterError>;
    fn close(&mut self) -> Result<(), WriterError>;
}

/// Open the writer matching the first entry's dtype.
pub fn open_writer(
    dir: &Path,
    name: &str,
    first: &RecordData,
) -> Result<Box<dyn RecordWriter>, WriterError> {
    std::fs::create_dir_all(dir)?;
    Ok(match first {
        RecordData::Video { width, height, fps, .. } => {
            Box::new(VideoWriter::create(dir, name, *width, *height, *fps)?)
        }
        RecordData::Audio { channels, sample_rate, .. } => {
            Box::new(AudioWriter::create(dir, name, *channels, *sample_rate)?)
        }
        RecordData::Image { .. } => Box::new(ImageWriter::create(dir, name)?),
        RecordData::Json { .. } => Box::new(JsonWriter::create(dir, name)?),
        RecordData::Tabular { .. } => Box::new(TabularWriter::create(dir, name)?),
    })
}
