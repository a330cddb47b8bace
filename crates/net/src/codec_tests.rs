// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use trellis_core::{ContentType, NodeId};

fn sample_chunk() -> DataChunk {
    let mut chunk = DataChunk::new(NodeId::from_string("nod-gen"), "Gen1", 42);
    chunk.insert_text("value", "7");
    chunk
}

#[test]
fn encode_decode_single_frame() {
    let mut codec = ChunkCodec::new();
    let chunk = sample_chunk();
    let mut buf = BytesMut::new();
    codec.encode(&chunk, &mut buf).unwrap();

    let decoded = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(decoded, chunk);
    assert!(buf.is_empty());
}

#[test]
fn partial_frame_yields_none() {
    let mut codec = ChunkCodec::new();
    let chunk = sample_chunk();
    let mut full = BytesMut::new();
    codec.encode(&chunk, &mut full).unwrap();

    let mut partial = BytesMut::from(&full[..full.len() / 2]);
    assert!(codec.decode(&mut partial).unwrap().is_none());

    partial.extend_from_slice(&full[full.len() / 2..]);
    let decoded = codec.decode(&mut partial).unwrap().unwrap();
    assert_eq!(decoded, chunk);
}

#[test]
fn back_to_back_frames_decode_in_order() {
    let mut codec = ChunkCodec::new();
    let mut buf = BytesMut::new();
    for i in 0..3 {
        let mut chunk = DataChunk::new(NodeId::from_string("nod-gen"), "Gen1", i);
        chunk.insert("payload", ContentType::Tensor, Bytes::from(vec![i as u8; 16]));
        codec.encode(&chunk, &mut buf).unwrap();
    }
    for i in 0..3 {
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.timestamp_ms, i);
    }
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn pre_encoded_bytes_frame_matches_chunk_frame() {
    let chunk = sample_chunk();
    let mut by_ref = BytesMut::new();
    ChunkCodec::new().encode(&chunk, &mut by_ref).unwrap();

    let mut by_bytes = BytesMut::new();
    ChunkCodec::new().encode(chunk.encode().unwrap(), &mut by_bytes).unwrap();

    assert_eq!(by_ref, by_bytes);
}
