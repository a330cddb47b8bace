// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Video stream writer: MJPEG frames muxed into `{name}.avi`.
//!
//! The container is a plain RIFF AVI — fixed 224-byte header, one `00dc`
//! chunk per JPEG frame, and an `idx1` index appended on close. Frame
//! counts and list sizes are patched into the header when the file is
//! finalized, which keeps appends sequential.

use crate::entry::{RecordData, RecordEntry};
use crate::writer::{RecordWriter, WriterError};
use ::image::ImageEncoder;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

/// Byte offset of the frames area (end of the fixed header).
const MOVI_DATA_START: u64 = 224;
/// Patch locations within the fixed header.
const RIFF_SIZE_AT: u64 = 4;
const TOTAL_FRAMES_AT: u64 = 48;
const STREAM_LENGTH_AT: u64 = 140;
const MOVI_SIZE_AT: u64 = 216;

const AVIF_HASINDEX: u32 = 0x0000_0010;
const AVIIF_KEYFRAME: u32 = 0x0000_0010;

pub struct VideoWriter {
    name: String,
    out: Option<File>,
    width: u32,
    height: u32,
    /// `(offset from the movi fourcc, chunk size)` per frame, for idx1.
    index: Vec<(u32, u32)>,
    movi_bytes: u32,
}

impl VideoWriter {
    pub fn create(
        dir: &Path,
        name: &str,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self, WriterError> {
        let mut out = File::create(dir.join(format!("{name}.avi")))?;
        write_header(&mut out, width, height, fps)?;
        Ok(Self {
            name: name.to_string(),
            out: Some(out),
            width,
            height,
            index: Vec::new(),
            movi_bytes: 0,
        })
    }

}

impl RecordWriter for VideoWriter {
    fn append(&mut self, entry: &RecordEntry) -> Result<(), WriterError> {
        let out = self.out.as_mut().ok_or(WriterError::Closed)?;
        let RecordData::Video { frame, width, height, .. } = &entry.data else {
            return Err(WriterError::DtypeMismatch {
                name: self.name.clone(),
                expected: "video",
                got: entry.data.dtype(),
            });
        };
        if *width != self.width || *height != self.height {
            return Err(WriterError::Encode(format!(
                "frame geometry changed: {}x{} != {}x{}",
                width, height, self.width, self.height
            )));
        }
        let jpeg = {
            let mut jpeg = Vec::new();
            let encoder = ::image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 85);
            encoder
                .write_image(frame, self.width, self.height, ::image::ExtendedColorType::Rgb8)
                .map_err(|e| WriterError::Encode(e.to_string()))?;
            jpeg
        };

        // Chunk offset recorded relative to the "movi" fourcc.
        let offset = 4 + self.movi_bytes;
        let size = jpeg.len() as u32;
        out.write_all(b"00dc")?;
        out.write_all(&size.to_le_bytes())?;
        out.write_all(&jpeg)?;
        let mut written = 8 + size;
        if size % 2 == 1 {
            out.write_all(&[0])?;
            written += 1;
        }
        self.movi_bytes += written;
        self.index.push((offset, size));
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriterError> {
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };
        // idx1 follows the frames.
        out.seek(SeekFrom::Start(MOVI_DATA_START + self.movi_bytes as u64))?;
        out.write_all(b"idx1")?;
        out.write_all(&((self.index.len() as u32) * 16).to_le_bytes())?;
        for (offset, size) in &self.index {
            out.write_all(b"00dc")?;
            out.write_all(&AVIIF_KEYFRAME.to_le_bytes())?;
            out.write_all(&offset.to_le_bytes())?;
            out.write_all(&size.to_le_bytes())?;
        }

        // Patch the sizes the header could not know up front.
        let file_len = out.stream_position()?;
        let frames = self.index.len() as u32;
        patch_u32(&mut out, RIFF_SIZE_AT, (file_len - 8) as u32)?;
        patch_u32(&mut out, TOTAL_FRAMES_AT, frames)?;
        patch_u32(&mut out, STREAM_LENGTH_AT, frames)?;
        patch_u32(&mut out, MOVI_SIZE_AT, 4 + self.movi_bytes)?;

        out.flush()?;
        out.sync_all()?;
        Ok(())
    }
}

fn patch_u32(out: &mut File, at: u64, value: u32) -> Result<(), WriterError> {
    out.seek(SeekFrom::Start(at))?;
    out.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_header(out: &mut File, width: u32, height: u32, fps: f64) -> Result<(), WriterError> {
    let fps = if fps.is_finite() && fps > 0.0 { fps } else { 30.0 };
    let micros_per_frame = (1_000_000.0 / fps) as u32;
    let rate = (fps * 1000.0) as u32;

    let mut header = Vec::with_capacity(MOVI_DATA_START as usize);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&0u32.to_le_bytes()); // patched on close
    header.extend_from_slice(b"AVI ");

    header.extend_from_slice(b"LIST");
    header.extend_from_slice(&192u32.to_le_bytes());
    header.extend_from_slice(b"hdrl");

    header.extend_from_slice(b"avih");
    header.extend_from_slice(&56u32.to_le_bytes());
    for value in [
        micros_per_frame,
        0, // max bytes/sec
        0, // padding granularity
        AVIF_HASINDEX,
        0, // total frames, patched on close
        0, // initial frames
        1, // streams
        0, // suggested buffer size
        width,
        height,
        0,
        0,
        0,
        0,
    ] {
        header.extend_from_slice(&value.to_le_bytes());
    }

    header.extend_from_slice(b"LIST");
    header.extend_from_slice(&116u32.to_le_bytes());
    header.extend_from_slice(b"strl");

    header.extend_from_slice(b"strh");
    header.extend_from_slice(&56u32.to_le_bytes());
    header.extend_from_slice(b"vids");
    header.extend_from_slice(b"MJPG");
    for value in [
        0u32,  // flags
        0,     // priority + language
        0,     // initial frames
        1000,  // scale
        rate,  // rate: fps = rate / scale
        0,     // start
        0,     // length, patched on close
        0,     // suggested buffer size
        10000, // quality
        0,     // sample size
    ] {
        header.extend_from_slice(&value.to_le_bytes());
    }
    for value in [0u16, 0, width as u16, height as u16] {
        header.extend_from_slice(&value.to_le_bytes());
    }

    header.extend_from_slice(b"strf");
    header.extend_from_slice(&40u32.to_le_bytes());
    header.extend_from_slice(&40u32.to_le_bytes()); // biSize
    header.extend_from_slice(&(width as i32).to_le_bytes());
    header.extend_from_slice(&(height as i32).to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // planes
    header.extend_from_slice(&24u16.to_le_bytes()); // bit count
    header.extend_from_slice(b"MJPG");
    header.extend_from_slice(&(width * height * 3).to_le_bytes());
    for value in [0u32, 0, 0, 0] {
        header.extend_from_slice(&value.to_le_bytes());
    }

    header.extend_from_slice(b"LIST");
    header.extend_from_slice(&4u32.to_le_bytes()); // movi size, patched on close
    header.extend_from_slice(b"movi");

    debug_assert_eq!(header.len() as u64, MOVI_DATA_START);
    out.write_all(&header)?;
    Ok(())
}

#[cfg(test)]
#[path = "video_tests.rs"]
mod tests;
