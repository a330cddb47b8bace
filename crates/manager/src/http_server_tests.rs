// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{Manager, ManagerConfig};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

async fn test_manager(dir: &std::path::Path) -> Manager {
    Manager::start(ManagerConfig::new(dir.to_path_buf())).await.unwrap()
}

fn url(manager: &Manager, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", manager.port(), path)
}

#[tokio::test]
async fn register_worker_appears_in_network_view() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(dir.path()).await;
    let client = reqwest::Client::new();

    let worker = WorkerState::new(WorkerId::from_string("wkr-a"), "w1");
    let response: ApiResponse = client
        .post(url(&manager, "/workers/register"))
        .json(&worker)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(response.success);

    let network: serde_json::Value =
        client.get(url(&manager, "/network")).send().await.unwrap().json().await.unwrap();
    assert!(network["workers"]["wkr-a"].is_object());
    assert_eq!(network["log_sink_enabled"], true);
    manager.shutdown().await;
}

#[tokio::test]
async fn ws_client_receives_network_updates_on_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(dir.path()).await;

    // UI client: register on the socket, then provoke a mutation.
    let (mut ws, _) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/ws", manager.port()))
            .await
            .unwrap();
    ws.send(Message::Text(
        serde_json::json!({"type": "ws:register", "id": "ui-1"}).to_string().into(),
    ))
    .await
    .unwrap();
    // Ack first.
    let ack = ws.next().await.unwrap().unwrap();
    assert!(ack.to_text().unwrap().contains("ws:ack"));

    let client = reqwest::Client::new();
    let worker = WorkerState::new(WorkerId::from_string("wkr-b"), "w1");
    client
        .post(url(&manager, "/workers/register"))
        .json(&worker)
        .send()
        .await
        .unwrap();

    // The snapshot matches the network view within the deadline.
    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(value["type"], "manager:network_status_update");
    assert!(value["state"]["workers"]["wkr-b"].is_object());

    let network: serde_json::Value =
        client.get(url(&manager, "/network")).send().await.unwrap().json().await.unwrap();
    assert_eq!(value["state"], network);
    manager.shutdown().await;
}

#[tokio::test]
async fn commit_route_surfaces_commit_errors() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(dir.path()).await;
    let client = reqwest::Client::new();

    let mut graph = Graph::new();
    let spec = trellis_core::NodeSpec::new("G", "counter");
    let node_id = spec.id;
    graph.add_node(spec).unwrap();
    let mut mapping = Mapping::new();
    mapping.insert(WorkerId::from_string("wkr-missing"), [node_id].into_iter().collect());

    let raw = client
        .post(url(&manager, "/graph/commit"))
        .json(&serde_json::json!({ "graph": graph, "mapping": mapping }))
        .send()
        .await
        .unwrap();
    assert_eq!(raw.status(), reqwest::StatusCode::OK);
    let response: ApiResponse = raw.json().await.unwrap();
    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.kind, "commit-error");
    assert_eq!(error.details["reason"], "invalid-mapping");
    manager.shutdown().await;
}

#[tokio::test]
async fn discovery_toggles() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(dir.path()).await;
    let client = reqwest::Client::new();

    let response: ApiResponse = client
        .post(url(&manager, "/discovery/enable"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(response.success);

    let response: ApiResponse = client
        .post(url(&manager, "/discovery/disable"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(response.success);
    manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_route_unparks_idle_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(dir.path()).await;
    let client = reqwest::Client::new();

    let response: ApiResponse = client
        .post(url(&manager, "/shutdown"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(response.success);

    tokio::time::timeout(Duration::from_secs(2), manager.idle()).await.unwrap();
    manager.shutdown().await;
    manager.shutdown().await;
}
