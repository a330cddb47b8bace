// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::entry::{RecordData, RecordEntry};
use trellis_core::ManualClock;

#[tokio::test]
async fn entries_fan_out_to_writers_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let queue = spawn_record_task(dir.path().to_path_buf(), ManualClock::default());

    for i in 0..3 {
        queue.push(RecordEntry::new(
            "events",
            RecordData::Json { value: serde_json::json!({"i": i}) },
        ));
    }
    queue.push(RecordEntry::new(
        "rows",
        RecordData::Tabular {
            row: [("col".to_string(), serde_json::json!(1))].into_iter().collect(),
        },
    ));

    let ranges = queue.collect().await;
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges["events"].dtype, "json");
    assert_eq!(ranges["rows"].dtype, "tabular");

    let raw = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
    assert_eq!(raw.lines().count(), 3);
    assert!(dir.path().join("rows.csv").exists());
}

#[tokio::test]
async fn ranges_span_first_to_last_append() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::at(1_000);
    let queue = spawn_record_task(dir.path().to_path_buf(), clock.clone());

    queue.push(RecordEntry::new("j", RecordData::Json { value: serde_json::json!(1) }));
    // Let the consumer stamp the first entry before advancing the clock.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    clock.advance(std::time::Duration::from_millis(500));
    queue.push(RecordEntry::new("j", RecordData::Json { value: serde_json::json!(2) }));

    let ranges = queue.collect().await;
    assert_eq!(ranges["j"].start_time, 1_000);
    assert_eq!(ranges["j"].end_time, 1_500);
}

#[tokio::test]
async fn writer_errors_do_not_stop_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let queue = spawn_record_task(dir.path().to_path_buf(), ManualClock::default());

    // First entry opens a json writer; the mismatched one errors, the
    // following one still lands.
    queue.push(RecordEntry::new("s", RecordData::Json { value: serde_json::json!(1) }));
    queue.push(RecordEntry::new(
        "s",
        RecordData::Tabular { row: serde_json::Map::new() },
    ));
    queue.push(RecordEntry::new("s", RecordData::Json { value: serde_json::json!(2) }));

    let ranges = queue.collect().await;
    assert_eq!(ranges["s"].dtype, "json");
    let raw = std::fs::read_to_string(dir.path().join("s.jsonl")).unwrap();
    assert_eq!(raw.lines().count(), 2);
}

#[tokio::test]
async fn collect_twice_reports_fresh_streams() {
    let dir = tempfile::tempdir().unwrap();
    let queue = spawn_record_task(dir.path().to_path_buf(), ManualClock::default());

    queue.push(RecordEntry::new("a", RecordData::Json { value: serde_json::json!(1) }));
    let first = queue.collect().await;
    assert!(first.contains_key("a"));

    // After collect the streams are closed; a new entry reopens.
    queue.push(RecordEntry::new("a", RecordData::Json { value: serde_json::json!(2) }));
    let second = queue.collect().await;
    assert!(second.contains_key("a"));

    let raw = std::fs::read_to_string(dir.path().join("a.jsonl")).unwrap();
    assert_eq!(raw.lines().count(), 2);
}
