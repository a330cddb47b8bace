// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Image stream writer: one PNG per sample under a per-name directory
//! (`{name}/0.png`, `{name}/1.png`, …).

use crate::entry::{RecordData, RecordEntry};
use crate::writer::{RecordWriter, WriterError};
use std::path::{Path, PathBuf};

pub struct ImageWriter {
    name: String,
    dir: PathBuf,
    seq: u64,
    closed: bool,
}

impl ImageWriter {
    pub fn create(dir: &Path, name: &str) -> Result<Self, WriterError> {
        let image_dir = dir.join(name);
        std::fs::create_dir_all(&image_dir)?;
        Ok(Self { name: name.to_string(), dir: image_dir, seq: 0, closed: false })
    }
}

impl RecordWriter for ImageWriter {
    fn append(&mut self, entry: &RecordEntry) -> Result<(), WriterError> {
        if self.closed {
            return Err(WriterError::Closed);
        }
        let RecordData::Image { data, width, height } = &entry.data else {
            return Err(WriterError::DtypeMismatch {
                name: self.name.clone(),
                expected: "image",
                got: entry.data.dtype(),
            });
        };
        let path = self.dir.join(format!("{}.png", self.seq));
        ::image::save_buffer(
            &path,
            data,
            *width,
            *height,
            ::image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| WriterError::Encode(e.to_string()))?;
        self.seq += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriterError> {
        // Samples are individually durable; nothing buffered.
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
#[path = "image_tests.rs"]
mod tests;
