// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use trellis_core::ManagerId;
use trellis_runtime::EventBus;

fn evented_state(dir: &std::path::Path, bus: EventBus) -> Evented<ManagerState> {
    Evented::new(
        ManagerState::new(ManagerId::new(), dir.to_path_buf()),
        "ManagerState",
        bus,
    )
}

#[tokio::test]
async fn start_exposes_port_in_manager_state() {
    let dir = tempfile::tempdir().unwrap();
    let state = evented_state(dir.path(), EventBus::new());
    let sink = LogSinkService::new(state.clone(), dir.path().to_path_buf());

    sink.start().await.unwrap();
    let port = sink.port().unwrap();
    assert!(port > 0);
    assert_eq!(state.read(|s| s.logs_subscription_port), Some(port));
    assert!(state.read(|s| s.log_sink_enabled));

    sink.shutdown().await.unwrap();
    assert!(!state.read(|s| s.log_sink_enabled));
}

#[tokio::test]
async fn datagrams_append_to_logs_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let state = evented_state(dir.path(), EventBus::new());
    let sink = LogSinkService::new(state, dir.path().to_path_buf());
    sink.start().await.unwrap();
    let port = sink.port().unwrap();

    let socket = tokio::net::UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
    socket.send_to(b"worker w1: node initialized\n", ("127.0.0.1", port)).await.unwrap();

    let path = dir.path().join("logs.jsonl");
    let mut content = String::new();
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        if let Ok(raw) = std::fs::read_to_string(&path) {
            if !raw.is_empty() {
                content = raw;
                break;
            }
        }
    }
    let line: serde_json::Value =
        serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(line["line"], "worker w1: node initialized");
    assert!(line["source"].as_str().unwrap().contains("127.0.0.1"));
    sink.shutdown().await.unwrap();
}
