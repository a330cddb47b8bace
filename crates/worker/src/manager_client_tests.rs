// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use axum::routing::post;
use axum::{Json, Router};
use trellis_core::{ApiResponse, WorkerId};
use trellis_net::{HttpServer, ServerConfig};

/// Stub manager recording the requests it sees.
struct StubManager {
    server: HttpServer,
    bound: trellis_net::BoundServer,
    registrations: Arc<Mutex<Vec<WorkerState>>>,
    heartbeats: Arc<Mutex<u32>>,
    collected: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn stub_manager(staging: PathBuf) -> StubManager {
    let registrations: Arc<Mutex<Vec<WorkerState>>> = Arc::new(Mutex::new(Vec::new()));
    let heartbeats = Arc::new(Mutex::new(0u32));
    let collected: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));

    let reg = Arc::clone(&registrations);
    let hb = Arc::clone(&heartbeats);
    let col = Arc::clone(&collected);
    let router = Router::new()
        .route(
            "/workers/register",
            post(move |Json(state): Json<WorkerState>| {
                let reg = Arc::clone(&reg);
                async move {
                    reg.lock().push(state);
                    Json(ApiResponse::ok())
                }
            }),
        )
        .route(
            "/workers/heartbeat",
            post(move |Json(_): Json<WorkerState>| {
                let hb = Arc::clone(&hb);
                async move {
                    *hb.lock() += 1;
                    Json(ApiResponse::ok())
                }
            }),
        )
        .route(
            "/workers/deregister",
            post(|Json(_): Json<serde_json::Value>| async { Json(ApiResponse::ok()) }),
        )
        .route(
            "/workers/collected",
            post(move |Json(body): Json<serde_json::Value>| {
                let col = Arc::clone(&col);
                async move {
                    col.lock().push(body);
                    Json(ApiResponse::ok())
                }
            }),
        );

    let (server, _rx) = HttpServer::new(ServerConfig {
        id: "mgr-stub".into(),
        port: 0,
        max_backpressure_frames: 8,
        staging_dir: Some(staging),
    });
    let bound = server.serve(router).await.unwrap();
    StubManager { server, bound, registrations, heartbeats, collected }
}

fn client_with_state(dir: &Path) -> (ManagerClientService, Arc<Mutex<WorkerState>>) {
    let state = Arc::new(Mutex::new(WorkerState::new(WorkerId::new(), "w1")));
    let client = ManagerClientService::new(Arc::clone(&state), dir.to_path_buf(), false);
    (client, state)
}

#[tokio::test]
async fn register_is_acknowledged_and_heartbeats_flow() {
    let staging = tempfile::tempdir().unwrap();
    let records = tempfile::tempdir().unwrap();
    let stub = stub_manager(staging.path().to_path_buf()).await;
    let (client, state) = client_with_state(records.path());

    client.register("127.0.0.1", stub.bound.addr.port()).await.unwrap();
    assert!(client.is_connected());
    assert_eq!(stub.registrations.lock().len(), 1);
    assert_eq!(stub.registrations.lock()[0].id, state.lock().id);

    // At least the immediate heartbeat tick lands.
    for _ in 0..100 {
        if *stub.heartbeats.lock() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(*stub.heartbeats.lock() > 0);

    client.shutdown().await.unwrap();
    stub.bound.shutdown().await;
}

#[tokio::test]
async fn send_archive_uploads_and_reports_ranges() {
    let staging = tempfile::tempdir().unwrap();
    let records = tempfile::tempdir().unwrap();
    std::fs::write(records.path().join("test.jsonl"), "{\"a\":1}\n").unwrap();
    std::fs::create_dir_all(records.path().join("imgs")).unwrap();
    std::fs::write(records.path().join("imgs").join("0.png"), [1u8, 2, 3]).unwrap();

    let stub = stub_manager(staging.path().to_path_buf()).await;
    let (client, state) = client_with_state(records.path());
    client.register("127.0.0.1", stub.bound.addr.port()).await.unwrap();

    let ranges: BTreeMap<String, RecordRange> = [(
        "test".to_string(),
        RecordRange { dtype: "json".into(), start_time: 1, end_time: 2 },
    )]
    .into_iter()
    .collect();
    client.send_archive(ranges).await.unwrap();

    let worker_id = state.lock().id.to_string();
    let transfers = stub.server.transfers(&worker_id);
    assert!(transfers["test.jsonl"].complete);
    assert!(transfers["imgs/0.png"].complete);

    let collected = stub.collected.lock();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0]["ranges"]["test"]["dtype"], "json");
    // delete_after_transfer=false keeps the local copy.
    assert!(records.path().join("test.jsonl").exists());

    stub.bound.shutdown().await;
}

#[tokio::test]
async fn delete_after_transfer_removes_local_files() {
    let staging = tempfile::tempdir().unwrap();
    let records = tempfile::tempdir().unwrap();
    std::fs::write(records.path().join("gone.jsonl"), "{}\n").unwrap();

    let stub = stub_manager(staging.path().to_path_buf()).await;
    let state = Arc::new(Mutex::new(WorkerState::new(WorkerId::new(), "w1")));
    let client = ManagerClientService::new(Arc::clone(&state), records.path().to_path_buf(), true);
    client.register("127.0.0.1", stub.bound.addr.port()).await.unwrap();

    client.send_archive(BTreeMap::new()).await.unwrap();
    assert!(!records.path().join("gone.jsonl").exists());
    stub.bound.shutdown().await;
}

#[tokio::test]
async fn operations_without_registration_fail() {
    let records = tempfile::tempdir().unwrap();
    let (client, _) = client_with_state(records.path());
    assert!(!client.is_connected());
    assert!(client.send_archive(BTreeMap::new()).await.is_err());
    assert!(client.deregister().await.is_err());
}

#[test]
fn collect_files_walks_recursively_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.txt"), "b").unwrap();
    std::fs::create_dir_all(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub").join("a.txt"), "a").unwrap();

    let files = collect_files(dir.path());
    assert_eq!(files.len(), 2);
    assert!(files[0].ends_with("b.txt"));
    assert!(files[1].ends_with("sub/a.txt"));
}
