// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The manager's north-bound HTTP/WS surface.
//!
//! REST endpoints cover worker membership, graph commit, lifecycle
//! commands, the registered-method proxy, and discovery toggles. UI
//! clients hold a WebSocket: every `ManagerState` mutation becomes a
//! `NETWORK_STATUS_UPDATE` broadcast and every node delta a
//! `NODE_STATUS_UPDATE`; slow consumers are disconnected by the server's
//! backpressure policy.

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use trellis_core::{
    ApiResponse, ErrorBody, Event, Graph, ManagerState, Mapping, NodeId, WorkerId, WorkerState,
};
use trellis_net::messages::UiMessage;
use trellis_net::{BoundServer, HttpServer};
use trellis_record::RecordRange;
use trellis_runtime::{EventBus, Evented, Service, ServiceError, TypedObserver};

use crate::discovery::{DiscoveryInfo, DiscoveryService};
use crate::session::SessionService;
use crate::worker_handler::{CommitOptions, PackageFile, WorkerHandler};

struct Ctx {
    bus: EventBus,
    state: Evented<ManagerState>,
    handler: Arc<WorkerHandler>,
    session: Arc<SessionService>,
    discovery: Arc<DiscoveryService>,
}

pub struct HttpServerService {
    server: HttpServer,
    ctx: Arc<Ctx>,
    bound: Mutex<Option<BoundServer>>,
    port: Mutex<u16>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<(String, serde_json::Value)>>>,
}

impl HttpServerService {
    pub fn new(
        server: HttpServer,
        incoming_rx: mpsc::UnboundedReceiver<(String, serde_json::Value)>,
        bus: EventBus,
        state: Evented<ManagerState>,
        handler: Arc<WorkerHandler>,
        session: Arc<SessionService>,
        discovery: Arc<DiscoveryService>,
    ) -> Self {
        Self {
            server,
            ctx: Arc::new(Ctx { bus, state, handler, session, discovery }),
            bound: Mutex::new(None),
            port: Mutex::new(0),
            incoming_rx: Mutex::new(Some(incoming_rx)),
        }
    }

    pub fn port(&self) -> u16 {
        *self.port.lock()
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/workers/register", post(register_worker))
            .route("/workers/deregister", post(deregister_worker))
            .route("/workers/heartbeat", post(heartbeat))
            .route("/workers/collected", post(worker_collected))
            .route("/graph/commit", post(commit_graph))
            .route("/pipeline/start", post(pipeline_start))
            .route("/pipeline/record", post(pipeline_record))
            .route("/pipeline/stop", post(pipeline_stop))
            .route("/pipeline/collect", post(pipeline_collect))
            .route("/pipeline/reset", post(pipeline_reset))
            .route("/pipeline/gather", get(pipeline_gather))
            .route("/network", get(network))
            .route("/nodes/registered_methods", post(registered_method))
            .route("/discovery/enable", post(discovery_enable))
            .route("/discovery/disable", post(discovery_disable))
            .route("/shutdown", post(shutdown))
            .with_state(Arc::clone(&self.ctx))
    }
}

#[async_trait]
impl Service for HttpServerService {
    fn name(&self) -> &'static str {
        "http-server"
    }

    async fn start(&self) -> Result<(), ServiceError> {
        let bound = self
            .server
            .serve(self.routes())
            .await
            .map_err(|e| ServiceError::new("http-server", e))?;
        *self.port.lock() = bound.addr.port();
        *self.bound.lock() = Some(bound);

        // UI clients only listen; drain their frames so the channel
        // never backs up.
        if let Some(mut incoming_rx) = self.incoming_rx.lock().take() {
            tokio::spawn(async move { while incoming_rx.recv().await.is_some() {} });
        }

        // Every state mutation fans out as a full snapshot; node deltas
        // ride separately.
        let server = self.server.clone();
        self.ctx
            .bus
            .subscribe(TypedObserver::on("state:changed", move |event| {
                let server = server.clone();
                async move {
                    if let Event::StateChanged { snapshot, .. } = event {
                        let frame = serde_json::json!({
                            "type": "manager:network_status_update",
                            "state": snapshot,
                        });
                        server.broadcast(&frame);
                    }
                    Ok(())
                }
            }))
            .await
            .map_err(|e| ServiceError::new("http-server", e))?;

        let server = self.server.clone();
        self.ctx
            .bus
            .subscribe(TypedObserver::on("node:status", move |event| {
                let server = server.clone();
                async move {
                    if let Event::NodeStatus { state } = event {
                        let frame =
                            serde_json::to_value(UiMessage::NodeStatusUpdate { state })
                                .unwrap_or(serde_json::Value::Null);
                        server.broadcast(&frame);
                    }
                    Ok(())
                }
            }))
            .await
            .map_err(|e| ServiceError::new("http-server", e))?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        if let Some(bound) = self.bound.lock().take() {
            tokio::spawn(bound.shutdown());
        }
        Ok(())
    }
}

async fn register_worker(
    State(ctx): State<Arc<Ctx>>,
    Json(worker): Json<WorkerState>,
) -> Json<ApiResponse> {
    ctx.handler.register_worker(worker);
    Json(ApiResponse::ok())
}

#[derive(Deserialize)]
struct WorkerIdBody {
    id: WorkerId,
}

async fn deregister_worker(
    State(ctx): State<Arc<Ctx>>,
    Json(body): Json<WorkerIdBody>,
) -> Json<ApiResponse> {
    ctx.handler.deregister_worker(body.id);
    Json(ApiResponse::ok())
}

async fn heartbeat(
    State(ctx): State<Arc<Ctx>>,
    Json(worker): Json<WorkerState>,
) -> Json<ApiResponse> {
    ctx.handler.heartbeat(worker);
    Json(ApiResponse::ok())
}

#[derive(Deserialize)]
struct CollectedBody {
    id: WorkerId,
    #[serde(default)]
    name: String,
    #[serde(default)]
    ranges: BTreeMap<String, RecordRange>,
}

async fn worker_collected(
    State(ctx): State<Arc<Ctx>>,
    Json(body): Json<CollectedBody>,
) -> Json<ApiResponse> {
    match ctx.session.ingest_worker(body.id, &body.name, body.ranges).await {
        Ok(()) => Json(ApiResponse::ok()),
        Err(e) => Json(ApiResponse::err(ErrorBody::new("lifecycle-error", e.to_string()))),
    }
}

#[derive(Deserialize)]
struct CommitBody {
    graph: Graph,
    mapping: Mapping,
    #[serde(default)]
    packages: Vec<PackageBody>,
}

#[derive(Deserialize)]
struct PackageBody {
    name: String,
    path: PathBuf,
}

async fn commit_graph(
    State(ctx): State<Arc<Ctx>>,
    Json(body): Json<CommitBody>,
) -> Json<ApiResponse> {
    let options = CommitOptions {
        packages: body
            .packages
            .into_iter()
            .map(|p| PackageFile { name: p.name, path: p.path })
            .collect(),
    };
    match ctx.handler.commit_graph(body.graph, body.mapping, options).await {
        Ok(()) => Json(ApiResponse::ok()),
        Err(e) => Json(ApiResponse::err(ErrorBody::from(&e))),
    }
}

async fn lifecycle_response(
    result: Result<(), crate::ManagerError>,
) -> Json<ApiResponse> {
    match result {
        Ok(()) => Json(ApiResponse::ok()),
        Err(e) => Json(ApiResponse::err(e.to_body())),
    }
}

async fn pipeline_start(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    lifecycle_response(ctx.handler.start_pipeline().await).await
}

async fn pipeline_record(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    lifecycle_response(ctx.handler.record().await).await
}

async fn pipeline_stop(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    lifecycle_response(ctx.handler.stop().await).await
}

async fn pipeline_collect(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    lifecycle_response(ctx.handler.collect().await).await
}

#[derive(Deserialize)]
struct ResetBody {
    #[serde(default)]
    keep_workers: bool,
}

async fn pipeline_reset(
    State(ctx): State<Arc<Ctx>>,
    Json(body): Json<ResetBody>,
) -> Json<ApiResponse> {
    lifecycle_response(ctx.handler.reset(body.keep_workers).await).await
}

async fn pipeline_gather(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    let merged = ctx.handler.gather().await;
    Json(ApiResponse::ok_with(serde_json::Value::Object(merged)))
}

async fn network(State(ctx): State<Arc<Ctx>>) -> Json<serde_json::Value> {
    Json(ctx.state.read(|s| s.to_json()))
}

#[derive(Deserialize)]
struct MethodBody {
    node_id: NodeId,
    method_name: String,
    #[serde(default)]
    params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    timeout: Option<f64>,
}

async fn registered_method(
    State(ctx): State<Arc<Ctx>>,
    Json(body): Json<MethodBody>,
) -> Json<ApiResponse> {
    let timeout = Duration::from_secs_f64(body.timeout.unwrap_or(10.0).max(0.001));
    match ctx
        .handler
        .request_registered_method(body.node_id, &body.method_name, body.params, timeout)
        .await
    {
        Ok(value) => Json(ApiResponse::ok_with(value)),
        Err(e) => Json(ApiResponse::err(e)),
    }
}

async fn discovery_enable(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    if ctx.discovery.re_enable().await {
        return Json(ApiResponse::ok());
    }
    let (id, host, port) =
        ctx.state.read(|s| (s.id.to_string(), s.ip.clone(), s.port));
    ctx.discovery.enable(DiscoveryInfo { id, host, port }).await;
    Json(ApiResponse::ok())
}

async fn discovery_disable(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    ctx.discovery.disable().await;
    Json(ApiResponse::ok())
}

/// Reply first, then schedule the shutdown through the bus.
async fn shutdown(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    let bus = ctx.bus.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.publish(Event::Shutdown);
    });
    Json(ApiResponse::ok())
}

#[cfg(test)]
#[path = "http_server_tests.rs"]
mod tests;
