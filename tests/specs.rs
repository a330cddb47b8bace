// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios: one manager, one or more workers, real sockets.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use trellis_core::{Graph, Mapping, NodeFsm, NodeSpec, Settings};
use trellis_manager::{CommitOptions, Manager, ManagerConfig};
use trellis_node::node::{Node, NodeError, StepInputs, StepOutput};
use trellis_node::NodeRegistry;
use trellis_worker::{Worker, WorkerConfig};

async fn start_manager(dir: &std::path::Path) -> Manager {
    let mut config = ManagerConfig::new(dir.to_path_buf());
    config.port = 0;
    Manager::start(config).await.unwrap()
}

async fn start_worker(dir: &std::path::Path, registry: NodeRegistry) -> Worker {
    let mut config = WorkerConfig::new("w1", dir.to_path_buf());
    config.port = 0;
    Worker::start(config, registry).await.unwrap()
}

async fn connected_pair(
    manager_dir: &std::path::Path,
    worker_dir: &std::path::Path,
) -> (Manager, Worker) {
    let manager = start_manager(manager_dir).await;
    let worker = start_worker(worker_dir, NodeRegistry::with_stock()).await;
    worker.connect(&manager.host(), manager.port()).await.unwrap();
    (manager, worker)
}

fn gen_con_graph(rate_hz: f64) -> (Graph, trellis_core::NodeId, trellis_core::NodeId) {
    let mut graph = Graph::new();
    let gen = NodeSpec::new("Gen1", "counter").with_rate(rate_hz);
    let con = NodeSpec::new("Con1", "collector");
    let (gen_id, con_id) = (gen.id, con.id);
    graph.add_node(gen).unwrap();
    graph.add_node(con).unwrap();
    graph.add_edge(gen_id, "out", con_id, "in").unwrap();
    (graph, gen_id, con_id)
}

// Scenario 1: a worker started on port 0 connects by (host, port) and
// appears in the manager's worker map.
#[tokio::test]
async fn worker_registration() {
    let mdir = tempfile::tempdir().unwrap();
    let wdir = tempfile::tempdir().unwrap();
    let (manager, worker) = connected_pair(mdir.path(), wdir.path()).await;

    let state = manager.state_snapshot();
    assert!(state.workers.contains_key(&worker.id()));

    worker.shutdown().await;
    manager.shutdown().await;
}

// Scenario 2: commit a two-node graph, then start → record → stop →
// collect; every command resolves successfully.
#[tokio::test]
async fn two_node_capture_session() {
    let mdir = tempfile::tempdir().unwrap();
    let wdir = tempfile::tempdir().unwrap();
    let (manager, worker) = connected_pair(mdir.path(), wdir.path()).await;

    let (graph, gen_id, con_id) = gen_con_graph(50.0);
    let mut mapping = Mapping::new();
    mapping.insert(worker.id(), [gen_id, con_id].into_iter().collect());
    manager.commit_graph(graph, mapping, CommitOptions::default()).await.unwrap();

    // Committed means the whole fleet reports READY.
    let state = manager.state_snapshot();
    assert!(state.workers[&worker.id()].nodes.values().all(|n| n.fsm == NodeFsm::Ready));

    manager.start_pipeline().await.unwrap();
    let state = manager.state_snapshot();
    assert!(state.workers[&worker.id()]
        .nodes
        .values()
        .all(|n| n.fsm == NodeFsm::Previewing));

    tokio::time::sleep(Duration::from_millis(500)).await;
    manager.record().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    manager.stop().await.unwrap();
    let state = manager.state_snapshot();
    assert!(state.workers[&worker.id()].nodes.values().all(|n| n.fsm == NodeFsm::Stopped));

    manager.collect().await.unwrap();

    // The session archive received the recorded streams.
    let meta = manager.session().meta_snapshot();
    assert!(meta.records.values().any(|streams| streams.contains_key("Gen1")));
    let session_dir = manager.session().session_dir();
    assert!(session_dir.join("meta.json").exists());
    assert!(session_dir.join("Gen1.jsonl").exists());

    worker.shutdown().await;
    manager.shutdown().await;
}

// Scenario 3: a blocking registered method invoked over the worker's
// HTTP API returns its value, and the counter resumes from it.
#[tokio::test]
async fn blocking_registered_method_over_http() {
    let wdir = tempfile::tempdir().unwrap();
    let worker = start_worker(wdir.path(), NodeRegistry::with_stock()).await;

    let spec = NodeSpec::new("RegNode1", "counter").with_rate(100.0);
    let node_id = spec.id;
    worker
        .node_handler()
        .create_node(trellis_core::NodeConfig { spec, in_bound: vec![], out_bound: vec![] })
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{}/nodes/registered_methods", worker.port()))
        .json(&serde_json::json!({
            "node_id": node_id,
            "method_name": "set_value",
            "timeout": 10,
            "params": { "value": -100 },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["return"], -100);

    // Subsequent steps count on from -100.
    let printed = worker
        .node_handler()
        .registered_method(
            node_id,
            "printout".into(),
            serde_json::Map::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(printed, serde_json::json!(-100));

    worker.shutdown().await;
}

struct SlowSetupSource;

#[async_trait]
impl Node for SlowSetupSource {
    async fn setup(&mut self) -> Result<(), NodeError> {
        // Injected spawn delay for the mid-commit reset scenario.
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    async fn step(&mut self, _: Option<StepInputs>) -> Result<Option<StepOutput>, NodeError> {
        Ok(None)
    }

    async fn teardown(&mut self) {}
}

// Scenario 4: reset(keep_workers=true) during a commit whose spawn is
// delayed leaves the worker registered, with no dangling nodes anywhere.
#[tokio::test]
async fn reset_mid_commit_leaves_no_dangling_nodes() {
    let mdir = tempfile::tempdir().unwrap();
    let wdir = tempfile::tempdir().unwrap();
    let manager = Arc::new(start_manager(mdir.path()).await);

    let mut registry = NodeRegistry::with_stock();
    registry.register("slow_setup", |_| Ok(Box::new(SlowSetupSource)));
    let worker = start_worker(wdir.path(), registry).await;
    worker.connect(&manager.host(), manager.port()).await.unwrap();

    let mut graph = Graph::new();
    let spec = NodeSpec::new("Slow1", "slow_setup");
    let node_id = spec.id;
    graph.add_node(spec).unwrap();
    let mut mapping = Mapping::new();
    mapping.insert(worker.id(), [node_id].into_iter().collect());

    let committer = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager.commit_graph(graph, mapping, CommitOptions::default()).await
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.reset(true).await.unwrap();
    let commit_result = committer.await.unwrap();
    assert!(commit_result.is_err());

    let state = manager.state_snapshot();
    assert_eq!(state.workers.len(), 1);
    assert!(state.workers[&worker.id()].nodes.is_empty());
    assert_eq!(worker.state_snapshot().nodes.len(), 0);
    assert_eq!(worker.node_handler().node_count(), 0);

    worker.shutdown().await;
    manager.shutdown().await;
}

// Scenario 5: a 100x100x3 image chunk crosses the data plane intact
// within two seconds.
#[tokio::test]
async fn image_chunk_crosses_the_data_plane() {
    use trellis_core::{ContentType, DataChunk};

    let publisher = trellis_net::Publisher::bind(Settings::default().pubsub.send_queue_depth)
        .await
        .unwrap();
    let subscriber =
        trellis_net::Subscriber::connect(vec![("127.0.0.1".to_string(), publisher.port())])
            .await
            .unwrap();
    for _ in 0..100 {
        if publisher.subscriber_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let pixels: Vec<u8> = (0..100u32 * 100 * 3).map(|i| (i % 255) as u8).collect();
    let mut sent = DataChunk::new(trellis_core::NodeId::new(), "cam", 1);
    sent.insert("test_image", ContentType::Image, bytes_from(pixels));
    publisher.publish(&sent).unwrap();

    let received = subscriber.recv(Duration::from_secs(2)).await.unwrap();
    assert_eq!(received, sent);
}

fn bytes_from(data: Vec<u8>) -> bytes::Bytes {
    bytes::Bytes::from(data)
}

// Scenario 6: five JSON entries written through the record pipeline land
// as five parseable lines in test-5.jsonl.
#[tokio::test]
async fn json_writer_five_entries() {
    use trellis_record::{RecordData, RecordEntry, RecordWriter};

    let dir = tempfile::tempdir().unwrap();
    let originals: Vec<serde_json::Value> = (0..5)
        .map(|count| {
            serde_json::json!({
                "content": format!("page {count}"),
                "response": "ok",
                "count": count,
                "next": format!("/page/{}", count + 1),
                "previous": serde_json::Value::Null,
                "results": [count, count + 1],
            })
        })
        .collect();

    let mut writer = trellis_record::json::JsonWriter::create(dir.path(), "test-5").unwrap();
    for value in &originals {
        writer
            .append(&RecordEntry::new("test-5", RecordData::Json { value: value.clone() }))
            .unwrap();
    }
    writer.close().unwrap();

    let raw = std::fs::read_to_string(dir.path().join("test-5.jsonl")).unwrap();
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 5);
    for (line, original) in lines.iter().zip(&originals) {
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(&parsed, original);
    }
}

// Second shutdown of an already-shut-down tier is a no-op.
#[tokio::test]
async fn shutdown_is_idempotent() {
    let mdir = tempfile::tempdir().unwrap();
    let wdir = tempfile::tempdir().unwrap();
    let (manager, worker) = connected_pair(mdir.path(), wdir.path()).await;

    worker.shutdown().await;
    worker.shutdown().await;
    manager.shutdown().await;
    manager.shutdown().await;
}
