// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audio stream writer: interleaved PCM i16 appended to `{name}.wav`.

use crate::entry::{RecordData, RecordEntry};
use crate::writer::{RecordWriter, WriterError};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub struct AudioWriter {
    name: String,
    out: Option<hound::WavWriter<BufWriter<File>>>,
}

impl AudioWriter {
    pub fn create(
        dir: &Path,
        name: &str,
        channels: u16,
        sample_rate: u32,
    ) -> Result<Self, WriterError> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let out = hound::WavWriter::create(dir.join(format!("{name}.wav")), spec)
            .map_err(|e| WriterError::Encode(e.to_string()))?;
        Ok(Self { name: name.to_string(), out: Some(out) })
    }
}

impl RecordWriter for AudioWriter {
    fn append(&mut self, entry: &RecordEntry) -> Result<(), WriterError> {
        let out = self.out.as_mut().ok_or(WriterError::Closed)?;
        let RecordData::Audio { samples, .. } = &entry.data else {
            return Err(WriterError::DtypeMismatch {
                name: self.name.clone(),
                expected: "audio",
                got: entry.data.dtype(),
            });
        };
        for pair in samples.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            out.write_sample(sample).map_err(|e| WriterError::Encode(e.to_string()))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriterError> {
        if let Some(out) = self.out.take() {
            out.finalize().map_err(|e| WriterError::Encode(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "audio_tests.rs"]
mod tests;
