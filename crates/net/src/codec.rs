// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-delimited chunk framing for the data plane.
//!
//! Frames are `u32` big-endian length + the chunk's own binary encoding.
//! Decoding hands the frame to [`DataChunk::decode`], which slices rather
//! than copies the payload bytes.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};
use trellis_core::DataChunk;

use crate::NetError;

/// Codec turning a TCP stream into a stream of [`DataChunk`]s.
pub struct ChunkCodec {
    inner: LengthDelimitedCodec,
}

impl ChunkCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_type::<u32>()
                .max_frame_length(256 * 1024 * 1024)
                .new_codec(),
        }
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkCodec {
    type Item = DataChunk;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(frame) => Ok(Some(DataChunk::decode(frame.freeze())?)),
            None => Ok(None),
        }
    }
}

impl Encoder<&DataChunk> for ChunkCodec {
    type Error = NetError;

    fn encode(&mut self, chunk: &DataChunk, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = chunk.encode()?;
        self.inner.encode(bytes, dst)?;
        Ok(())
    }
}

/// Encode a pre-serialized chunk body (used by the publisher, which
/// serializes once and fans the same bytes out to every subscriber).
impl Encoder<Bytes> for ChunkCodec {
    type Error = NetError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.inner.encode(body, dst)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
