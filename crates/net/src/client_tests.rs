// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::server::{HttpServer, ServerConfig};
use axum::Router;

fn ws_config(port: u16, id: &str) -> WsClientConfig {
    WsClientConfig {
        url: format!("ws://127.0.0.1:{port}/ws"),
        id: id.to_string(),
        backoff_base: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(5),
    }
}

async fn server_on_port() -> (HttpServer, tokio::sync::mpsc::UnboundedReceiver<(String, serde_json::Value)>, crate::server::BoundServer)
{
    let (server, rx) = HttpServer::new(ServerConfig {
        id: "mgr-test".into(),
        port: 0,
        max_backpressure_frames: 8,
        staging_dir: None,
    });
    let bound = server.serve(Router::new()).await.unwrap();
    (server, rx, bound)
}

#[tokio::test]
async fn register_and_exchange_frames() {
    let (server, mut rx, bound) = server_on_port().await;
    let (client, mut incoming) =
        WsClient::connect(ws_config(bound.addr.port(), "nod-a")).await.unwrap();
    assert!(client.is_connected());

    // Client → server.
    assert!(client.send(serde_json::json!({"type": "node:ping", "n": 1})));
    let (sender, value) =
        tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(sender, "nod-a");
    assert_eq!(value["n"], 1);

    // Server → client.
    assert!(server.send_to("nod-a", &serde_json::json!({"type": "cmd", "go": true})));
    let value =
        tokio::time::timeout(Duration::from_secs(2), incoming.recv()).await.unwrap().unwrap();
    assert_eq!(value["go"], true);

    client.close();
    bound.shutdown().await;
}

#[tokio::test]
async fn connect_times_out_against_dead_peer() {
    // Bind-then-drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = ws_config(port, "nod-a");
    config.connect_timeout = Duration::from_millis(200);
    let err = WsClient::connect(config).await.unwrap_err();
    assert!(matches!(err, NetError::Timeout(_)));
}

#[tokio::test]
async fn client_reconnects_after_server_restart() {
    let (_, _rx, bound) = server_on_port().await;
    let port = bound.addr.port();
    let (client, _incoming) = WsClient::connect(ws_config(port, "nod-r")).await.unwrap();
    assert!(client.is_connected());

    bound.shutdown().await;
    // Wait for the client to notice the loss.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Restart a server on the same port.
    let (server2, _rx2) = HttpServer::new(ServerConfig {
        id: "mgr-test".into(),
        port,
        max_backpressure_frames: 8,
        staging_dir: None,
    });
    let bound2 = server2.serve(Router::new()).await.unwrap();

    // Backoff caps at 100ms, so reconnection is quick.
    let mut reconnected = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if client.is_connected() {
            reconnected = true;
            break;
        }
    }
    assert!(reconnected);
    client.close();
    bound2.shutdown().await;
}

#[tokio::test]
async fn http_client_reports_unreachable_peer() {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = HttpClient::new("127.0.0.1", port);
    let err = client.post("/nodes/start", &serde_json::json!({})).await.unwrap_err();
    assert!(err.peer.contains(&port.to_string()));
}
