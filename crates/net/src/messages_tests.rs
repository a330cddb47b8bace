// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use trellis_core::{ManagerId, NodeId, RequestId};

#[test]
fn register_handshake_roundtrip() {
    let register = WsControl::Register { id: "wkr-abc".into() };
    let json = serde_json::to_value(&register).unwrap();
    assert_eq!(json["type"], "ws:register");
    let back: WsControl = serde_json::from_value(json).unwrap();
    assert_eq!(back, register);

    let ack = WsControl::Ack { server_id: "mgr-xyz".into() };
    assert_eq!(serde_json::to_value(&ack).unwrap()["type"], "ws:ack");
}

#[test]
fn status_message_carries_state() {
    let state = NodeState::new(NodeId::from_string("nod-a"), "Gen1");
    let msg = NodeMessage::Status { state: state.clone() };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "node:status");
    assert_eq!(json["state"]["name"], "Gen1");
    let back: NodeMessage = serde_json::from_value(json).unwrap();
    assert_eq!(back, NodeMessage::Status { state });
}

#[test]
fn report_results_correlates_by_request() {
    let msg = NodeMessage::ReportResults {
        node_id: NodeId::from_string("nod-a"),
        request: RequestId::from_string("req-9"),
        success: true,
        output: Some(serde_json::json!(-100)),
        error: None,
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["request"], "req-9");
    assert_eq!(json["output"], -100);
    assert!(json.get("error").is_none());
}

#[test]
fn gather_report_value_is_optional() {
    let msg = NodeMessage::ReportGather {
        node_id: NodeId::from_string("nod-a"),
        fsm: NodeFsm::Previewing,
        latest_value: None,
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert!(json.get("latest_value").is_none());
    assert_eq!(json["fsm"], "PREVIEWING");
}

#[test]
fn network_status_update_roundtrip() {
    let state = ManagerState::new(ManagerId::new(), "/data".into());
    let msg = UiMessage::NetworkStatusUpdate { state: state.clone() };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "manager:network_status_update");
    let back: UiMessage = serde_json::from_value(json).unwrap();
    assert_eq!(back, UiMessage::NetworkStatusUpdate { state });
}

#[test]
fn error_frame_shape() {
    let msg = UiMessage::Error { payload: ErrorBody::new("timeout-error", "commit timed out") };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "error");
    assert_eq!(json["payload"]["kind"], "timeout-error");
}
