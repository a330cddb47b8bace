// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use trellis_runtime::EventBus;

fn ranges_of(name: &str) -> BTreeMap<String, RecordRange> {
    [(
        name.to_string(),
        RecordRange { dtype: "json".into(), start_time: 10, end_time: 20 },
    )]
    .into_iter()
    .collect()
}

#[tokio::test]
async fn ingest_moves_staged_files_and_writes_meta() {
    let dir = tempfile::tempdir().unwrap();
    let logdir = dir.path().to_path_buf();
    let staging = logdir.join(".incoming");
    let bus = EventBus::new();
    let service = SessionService::new(logdir.clone(), "session".into(), staging.clone(), bus);

    let worker_id = WorkerId::from_string("wkr-a");
    let worker_staging = staging.join(worker_id.as_str());
    std::fs::create_dir_all(worker_staging.join("imgs")).unwrap();
    std::fs::write(worker_staging.join("test.jsonl"), "{}\n").unwrap();
    std::fs::write(worker_staging.join("imgs").join("0.png"), [9u8]).unwrap();

    service.ingest_worker(worker_id, "w1", ranges_of("test")).await.unwrap();

    let session_dir = logdir.join("session");
    assert!(session_dir.join("test.jsonl").exists());
    assert!(session_dir.join("imgs").join("0.png").exists());
    assert!(!worker_staging.exists());

    let meta = trellis_record::SessionMeta::load(&session_dir).unwrap();
    assert_eq!(meta.id, "session");
    assert_eq!(meta.subsessions, vec!["w1"]);
    assert_eq!(meta.records["w1"]["test"].dtype, "json");
}

#[tokio::test]
async fn ingest_publishes_session_saved() {
    let dir = tempfile::tempdir().unwrap();
    let bus = EventBus::new();
    let (_, mut saved) = bus.subscribe_sink(Some("session:saved")).await.unwrap();
    let service = SessionService::new(
        dir.path().to_path_buf(),
        "s1".into(),
        dir.path().join(".incoming"),
        bus,
    );

    service.ingest_worker(WorkerId::new(), "w1", ranges_of("a")).await.unwrap();
    let event = tokio::time::timeout(std::time::Duration::from_secs(1), saved.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, Event::SessionSaved { session: "s1".into() });
}

#[tokio::test]
async fn multiple_workers_merge_into_one_meta() {
    let dir = tempfile::tempdir().unwrap();
    let bus = EventBus::new();
    let service = SessionService::new(
        dir.path().to_path_buf(),
        "multi".into(),
        dir.path().join(".incoming"),
        bus,
    );

    service.ingest_worker(WorkerId::new(), "w1", ranges_of("audio")).await.unwrap();
    service.ingest_worker(WorkerId::new(), "w2", ranges_of("video")).await.unwrap();

    let meta = service.meta_snapshot();
    assert_eq!(meta.subsessions, vec!["w1", "w2"]);
    assert!(meta.records["w1"].contains_key("audio"));
    assert!(meta.records["w2"].contains_key("video"));
}
