// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use trellis_core::{NodeSpec, WorkerId};
use trellis_node::node::{Node, NodeError, StepInputs, StepOutput};

fn test_handler(dir: &std::path::Path, settings: Settings) -> (Arc<NodeHandler>, EventBus) {
    let state = Arc::new(Mutex::new(WorkerState::new(WorkerId::new(), "w1")));
    state.lock().ip = "127.0.0.1".into();
    let bus = EventBus::new();
    let handler = Arc::new(NodeHandler::new(
        state,
        bus.clone(),
        trellis_node::NodeRegistry::with_stock(),
        settings,
        dir.to_path_buf(),
        dir.join("node-configs"),
    ));
    (handler, bus)
}

fn counter_config() -> NodeConfig {
    let spec = NodeSpec::new("Gen1", "counter").with_rate(100.0);
    NodeConfig { spec, in_bound: vec![], out_bound: vec![] }
}

#[tokio::test]
async fn create_node_waits_for_initialized() {
    let dir = tempfile::tempdir().unwrap();
    let (handler, _bus) = test_handler(dir.path(), Settings::default());
    let config = counter_config();
    let id = config.spec.id;

    handler.create_node(config.clone()).await.unwrap();
    assert_eq!(handler.fsm_of(&id), Some(NodeFsm::Initialized));
    assert_eq!(handler.node_count(), 1);

    // Re-creating the same node is a no-op.
    handler.create_node(config).await.unwrap();
    assert_eq!(handler.node_count(), 1);
    handler.destroy_all().await;
}

struct StuckSetup;

#[async_trait]
impl Node for StuckSetup {
    async fn setup(&mut self) -> Result<(), NodeError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }

    async fn step(&mut self, _: Option<StepInputs>) -> Result<Option<StepOutput>, NodeError> {
        Ok(None)
    }

    async fn teardown(&mut self) {}
}

#[tokio::test]
async fn spawn_timeout_reaps_the_node() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.worker.timeout.node_creation_ms = 200;

    let state = Arc::new(Mutex::new(WorkerState::new(WorkerId::new(), "w1")));
    let bus = EventBus::new();
    let mut registry = trellis_node::NodeRegistry::new();
    registry.register("stuck", |_| Ok(Box::new(StuckSetup)));
    let handler = Arc::new(NodeHandler::new(
        state,
        bus,
        registry,
        settings,
        dir.path().to_path_buf(),
        dir.path().join("node-configs"),
    ));

    let config = NodeConfig {
        spec: NodeSpec::new("S", "stuck"),
        in_bound: vec![],
        out_bound: vec![],
    };
    let err = handler.create_node(config).await.unwrap_err();
    assert_eq!(err.details["reason"], "spawn-timeout");
    assert_eq!(handler.node_count(), 0);
}

#[tokio::test]
async fn lifecycle_broadcasts_reach_every_node() {
    let dir = tempfile::tempdir().unwrap();
    let (handler, _bus) = test_handler(dir.path(), Settings::default());
    handler.create_node(counter_config()).await.unwrap();
    handler.create_node(counter_config()).await.unwrap();

    handler.process_node_server_data(PeerTable::new()).await.unwrap();
    handler.start_nodes().await.unwrap();
    handler.record().await.unwrap();
    handler.stop_nodes().await.unwrap();

    let ranges = handler.collect().await.unwrap();
    assert_eq!(ranges.get("Gen1").map(|r| r.dtype.as_str()), Some("json"));
    handler.destroy_all().await;
    assert_eq!(handler.node_count(), 0);
}

#[tokio::test]
async fn peer_table_is_filtered_per_node() {
    let dir = tempfile::tempdir().unwrap();
    let (handler, _bus) = test_handler(dir.path(), Settings::default());

    // Gen publishes; Con subscribes to Gen.
    let gen = counter_config();
    let gen_id = gen.spec.id;
    let mut gen = gen;
    let con_spec = NodeSpec::new("Con1", "collector");
    let con_id = con_spec.id;
    gen.out_bound = vec![con_id];
    let con = NodeConfig { spec: con_spec, in_bound: vec![gen_id], out_bound: vec![] };

    handler.create_node(gen).await.unwrap();
    handler.create_node(con).await.unwrap();

    let mut table = handler.local_server_data();
    // The merged table may contain peers from other workers; extras are
    // ignored by nodes that do not subscribe to them.
    table.insert(
        trellis_core::NodeId::new(),
        PeerEntry { host: "203.0.113.9".into(), port: 1 },
    );
    assert!(table.get(&gen_id).is_some_and(|e| e.port > 0));

    handler.process_node_server_data(table).await.unwrap();
    assert_eq!(handler.fsm_of(&gen_id), Some(NodeFsm::Ready));
    assert_eq!(handler.fsm_of(&con_id), Some(NodeFsm::Ready));
    handler.destroy_all().await;
}

#[tokio::test]
async fn registered_method_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let (handler, _bus) = test_handler(dir.path(), Settings::default());
    let config = counter_config();
    let id = config.spec.id;
    handler.create_node(config).await.unwrap();

    let mut params = serde_json::Map::new();
    params.insert("value".into(), serde_json::json!(-100));
    let output = handler
        .registered_method(id, "set_value".into(), params, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(output, serde_json::json!(-100));

    let err = handler
        .registered_method(id, "warp".into(), serde_json::Map::new(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.message.contains("unknown method"));

    let err = handler
        .registered_method(
            trellis_core::NodeId::new(),
            "set_value".into(),
            serde_json::Map::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
    assert!(err.message.contains("no such node"));
    handler.destroy_all().await;
}

#[tokio::test]
async fn destroy_node_reaps_state() {
    let dir = tempfile::tempdir().unwrap();
    let (handler, _bus) = test_handler(dir.path(), Settings::default());
    let config = counter_config();
    let id = config.spec.id;
    handler.create_node(config).await.unwrap();

    handler.destroy_node(id).await.unwrap();
    assert_eq!(handler.node_count(), 0);
    assert!(handler.fsm_of(&id).is_none());
    // Destroying an unknown node is a no-op.
    handler.destroy_node(id).await.unwrap();
}

#[tokio::test]
async fn process_mode_requires_the_worker_socket() {
    let dir = tempfile::tempdir().unwrap();
    let (handler, _bus) = test_handler(dir.path(), Settings::default());

    // No attach_ws: the handler cannot hand a subordinate process its
    // control channel, so the create must fail cleanly.
    let spec = NodeSpec::new("P", "counter")
        .with_params(serde_json::json!({ "process": true }));
    let err = handler
        .create_node(NodeConfig { spec, in_bound: vec![], out_bound: vec![] })
        .await
        .unwrap_err();
    assert!(err.message.contains("socket not ready"));
    assert_eq!(handler.node_count(), 0);
}

#[tokio::test]
async fn relay_kind_builds_via_registry() {
    // Smoke-check that a consumer-only node initializes too.
    let dir = tempfile::tempdir().unwrap();
    let (handler, _bus) = test_handler(dir.path(), Settings::default());
    let spec = NodeSpec::new("R", "relay");
    let id = spec.id;
    let config = NodeConfig { spec, in_bound: vec![], out_bound: vec![] };
    handler.create_node(config).await.unwrap();
    assert_eq!(handler.fsm_of(&id), Some(NodeFsm::Initialized));
    handler.destroy_all().await;
}
