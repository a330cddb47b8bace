// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::client::HttpClient;

fn test_config(staging: Option<PathBuf>) -> ServerConfig {
    ServerConfig {
        id: "wkr-server".into(),
        port: 0,
        max_backpressure_frames: 4,
        staging_dir: staging,
    }
}

#[tokio::test]
async fn binds_os_chosen_port() {
    let (server, _rx) = HttpServer::new(test_config(None));
    let bound = server.serve(Router::new()).await.unwrap();
    assert_ne!(bound.addr.port(), 0);
    bound.shutdown().await;
}

#[tokio::test]
async fn merges_caller_routes() {
    let (server, _rx) = HttpServer::new(test_config(None));
    let app = Router::new().route("/hello", get(|| async { "hi" }));
    let bound = server.serve(app).await.unwrap();

    let body: String = reqwest::get(format!("http://127.0.0.1:{}/hello", bound.addr.port()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "hi");
    bound.shutdown().await;
}

#[tokio::test]
async fn upload_updates_transfer_records() {
    let dir = tempfile::tempdir().unwrap();
    let (server, _rx) = HttpServer::new(test_config(Some(dir.path().to_path_buf())));
    let bound = server.serve(Router::new()).await.unwrap();

    let client = HttpClient::new("127.0.0.1", bound.addr.port());
    let content = b"package bytes";
    let response = client.upload_file("wkr-a", "userpkg.tar", content).await.unwrap();
    assert!(response.success);

    let transfers = server.transfers("wkr-a");
    let record = transfers.get("userpkg.tar").unwrap();
    assert!(record.complete);
    assert_eq!(record.size, content.len() as u64);
    assert_eq!(std::fs::read(&record.dst_filepath).unwrap(), content);
    bound.shutdown().await;
}

#[tokio::test]
async fn upload_rejects_traversal_and_missing_name() {
    let dir = tempfile::tempdir().unwrap();
    let (server, _rx) = HttpServer::new(test_config(Some(dir.path().to_path_buf())));
    let bound = server.serve(Router::new()).await.unwrap();
    let url = format!("http://127.0.0.1:{}/files/upload", bound.addr.port());
    let http = reqwest::Client::new();

    let resp: ApiResponse = http
        .post(&url)
        .header("x-sender-id", "wkr-a")
        .header("x-filename", "../escape")
        .body("x")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!resp.success);

    let resp: ApiResponse =
        http.post(&url).body("x").send().await.unwrap().json().await.unwrap();
    assert!(!resp.success);
    bound.shutdown().await;
}

#[tokio::test]
async fn upload_verifies_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let (server, _rx) = HttpServer::new(test_config(Some(dir.path().to_path_buf())));
    let bound = server.serve(Router::new()).await.unwrap();
    let url = format!("http://127.0.0.1:{}/files/upload", bound.addr.port());

    let resp: ApiResponse = reqwest::Client::new()
        .post(&url)
        .header("x-sender-id", "wkr-a")
        .header("x-filename", "data.bin")
        .header("x-sha256", "deadbeef")
        .body("content")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!resp.success);
    assert_eq!(resp.error.unwrap().message, "checksum mismatch");
    bound.shutdown().await;
}

#[tokio::test]
async fn send_to_unknown_client_is_false() {
    let (server, _rx) = HttpServer::new(test_config(None));
    assert!(!server.send_to("nobody", &serde_json::json!({"type": "x"})));
    assert!(server.client_ids().is_empty());
}
