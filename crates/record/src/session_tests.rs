// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn range(dtype: &str, start: u64, end: u64) -> RecordRange {
    RecordRange { dtype: dtype.to_string(), start_time: start, end_time: end }
}

#[test]
fn save_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut meta = SessionMeta::new("session-1");
    meta.add_records(
        "chunk-0",
        [("test".to_string(), range("json", 10, 20))].into_iter().collect(),
    );
    meta.save(dir.path()).unwrap();

    let loaded = SessionMeta::load(dir.path()).unwrap();
    assert_eq!(loaded, meta);
    assert!(dir.path().join("meta.json").exists());
}

#[test]
fn add_records_tracks_subsessions_once() {
    let mut meta = SessionMeta::new("s");
    meta.add_records("a", [("x".to_string(), range("wav", 1, 2))].into_iter().collect());
    meta.add_records("a", [("y".to_string(), range("json", 3, 4))].into_iter().collect());
    assert_eq!(meta.subsessions, vec!["a"]);
    assert_eq!(meta.records["a"].len(), 2);
}

#[test]
fn meta_json_shape() {
    let dir = tempfile::tempdir().unwrap();
    let mut meta = SessionMeta::new("s1");
    meta.add_records("run", [("audio".to_string(), range("audio", 5, 9))].into_iter().collect());
    meta.save(dir.path()).unwrap();

    let raw = std::fs::read_to_string(dir.path().join("meta.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["id"], "s1");
    assert_eq!(json["records"]["run"]["audio"]["dtype"], "audio");
    assert_eq!(json["records"]["run"]["audio"]["start_time"], 5);
    assert_eq!(json["records"]["run"]["audio"]["end_time"], 9);
}

#[test]
fn load_missing_meta_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(SessionMeta::load(dir.path()).is_err());
}
