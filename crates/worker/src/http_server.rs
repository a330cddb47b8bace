// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker's HTTP surface, consumed by the manager.
//!
//! Every route publishes an event on the worker bus and awaits its
//! `command:done` acknowledgement — routes never mutate state directly.
//! The embedded WebSocket endpoint ingests node reports (`STATUS`,
//! `REPORT_GATHER`, `REPORT_RESULTS`, plus collected/failed) from
//! process-mode nodes.

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use trellis_core::{
    ApiResponse, ErrorBody, Event, NodeConfig, NodeId, PeerTable, RequestId, Settings,
    WorkerState,
};
use trellis_node::link::link_event_from_frame;
use trellis_runtime::{EventBus, Service, ServiceError};

use crate::manager_client::ManagerClientService;
use crate::node_handler::NodeHandler;
use trellis_net::{BoundServer, HttpServer};

struct Ctx {
    bus: EventBus,
    state: Arc<Mutex<WorkerState>>,
    handler: Arc<NodeHandler>,
    manager_client: Arc<ManagerClientService>,
    settings: Settings,
}

pub struct HttpServerService {
    server: HttpServer,
    ctx: Arc<Ctx>,
    bound: Mutex<Option<BoundServer>>,
    port: Mutex<u16>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<(String, serde_json::Value)>>>,
}

impl HttpServerService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server: HttpServer,
        incoming_rx: mpsc::UnboundedReceiver<(String, serde_json::Value)>,
        bus: EventBus,
        state: Arc<Mutex<WorkerState>>,
        handler: Arc<NodeHandler>,
        manager_client: Arc<ManagerClientService>,
        settings: Settings,
    ) -> Self {
        Self {
            server,
            ctx: Arc::new(Ctx { bus, state, handler, manager_client, settings }),
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
            .route("/nodes/create", post(create_node))
            .route("/nodes/destroy", post(destroy_node))
            .route("/nodes/server_data", get(report_server_data).post(process_server_data))
            .route("/nodes/gather", get(gather))
            .route("/nodes/collect", post(collect))
            .route("/nodes/step", post(step))
            .route("/nodes/start", post(start_nodes))
            .route("/nodes/record", post(record))
            .route("/nodes/registered_methods", post(registered_method))
            .route("/nodes/stop", post(stop_nodes))
            .route("/packages/load", post(load_packages))
            .route("/state", get(report_state))
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

        // Process-mode nodes connect back to this socket; their commands
        // travel the same WS connection.
        let server = self.server.clone();
        self.ctx.handler.attach_ws(
            format!("ws://127.0.0.1:{}/ws", bound.addr.port()),
            Arc::new(move |client_id, frame| server.send_to(client_id, frame)),
        );
        *self.bound.lock() = Some(bound);

        // Node reports arriving over the WebSocket feed the same ingest
        // path as in-process control channels.
        if let Some(mut incoming_rx) = self.incoming_rx.lock().take() {
            let handler = Arc::clone(&self.ctx.handler);
            tokio::spawn(async move {
                while let Some((sender, frame)) = incoming_rx.recv().await {
                    match link_event_from_frame(&frame) {
                        Some(event) => handler.ingest_ws_report(event),
                        None => {
                            tracing::debug!(sender = %sender, "unhandled ws frame");
                        }
                    }
                }
            });
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        if let Some(bound) = self.bound.lock().take() {
            tokio::spawn(bound.shutdown());
        }
        Ok(())
    }
}

/// Publish `event` and await its `command:done` ack.
///
/// The sink is registered before the event is published, so the ack
/// cannot slip past the waiter.
async fn dispatch(ctx: &Ctx, request: RequestId, event: Event, timeout: Duration) -> ApiResponse {
    let Ok((observer, mut acks)) = ctx.bus.subscribe_sink(Some("command:done")).await else {
        return ApiResponse::err(ErrorBody::new("protocol-error", "bus closed"));
    };
    ctx.bus.publish(event);

    let response = tokio::time::timeout(timeout, async {
        while let Some(ack) = acks.recv().await {
            match ack {
                Event::CommandDone { request: r, success: true, value, .. } if r == request => {
                    return match value {
                        Some(value) => ApiResponse::ok_with(value),
                        None => ApiResponse::ok(),
                    };
                }
                Event::CommandDone { request: r, error, .. } if r == request => {
                    return ApiResponse::err(error.unwrap_or_else(|| {
                        ErrorBody::new("lifecycle-error", "command failed")
                    }));
                }
                _ => {}
            }
        }
        ApiResponse::err(ErrorBody::new("protocol-error", "bus closed"))
    })
    .await
    .unwrap_or_else(|_| {
        ApiResponse::err(ErrorBody::new(
            "timeout-error",
            format!("no ack within {}ms", timeout.as_millis()),
        ))
    });
    ctx.bus.unsubscribe(observer);
    response
}

async fn create_node(State(ctx): State<Arc<Ctx>>, Json(config): Json<NodeConfig>) -> Json<ApiResponse> {
    let request = RequestId::new();
    let timeout = ctx.settings.node_creation_timeout() + Duration::from_secs(1);
    Json(dispatch(&ctx, request, Event::NodeCreate { config, request }, timeout).await)
}

#[derive(Deserialize)]
struct DestroyBody {
    id: NodeId,
}

async fn destroy_node(
    State(ctx): State<Arc<Ctx>>,
    Json(body): Json<DestroyBody>,
) -> Json<ApiResponse> {
    let request = RequestId::new();
    let timeout = ctx.settings.lifecycle_timeout() + Duration::from_secs(1);
    Json(dispatch(&ctx, request, Event::NodeDestroy { id: body.id, request }, timeout).await)
}

async fn report_server_data(State(ctx): State<Arc<Ctx>>) -> Json<serde_json::Value> {
    let fragment = ctx.handler.local_server_data();
    Json(serde_json::json!({ "success": true, "node_server_data": fragment }))
}

async fn process_server_data(
    State(ctx): State<Arc<Ctx>>,
    Json(table): Json<PeerTable>,
) -> Json<ApiResponse> {
    let request = RequestId::new();
    let timeout = ctx.settings.lifecycle_timeout() + Duration::from_secs(1);
    Json(dispatch(&ctx, request, Event::NodePeers { table, request }, timeout).await)
}

async fn gather(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    let request = RequestId::new();
    let timeout = ctx.settings.lifecycle_timeout() + Duration::from_secs(1);
    Json(dispatch(&ctx, request, Event::NodeGather { request }, timeout).await)
}

/// Collect flushes the record queues, then pushes the staged artifacts
/// up to the manager.
async fn collect(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    let request = RequestId::new();
    let timeout = ctx.settings.lifecycle_timeout() + Duration::from_secs(5);
    let response = dispatch(&ctx, request, Event::NodeCollect { request }, timeout).await;
    if response.success {
        let ranges = response
            .value
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        if let Err(e) = ctx.manager_client.send_archive(ranges).await {
            return Json(ApiResponse::err(ErrorBody::new("transport-error", e.to_string())));
        }
    }
    Json(response)
}

async fn step(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    let request = RequestId::new();
    let timeout = ctx.settings.lifecycle_timeout();
    Json(dispatch(&ctx, request, Event::NodeStep { request }, timeout).await)
}

async fn start_nodes(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    let request = RequestId::new();
    let timeout = ctx.settings.lifecycle_timeout() + Duration::from_secs(1);
    Json(dispatch(&ctx, request, Event::NodeStart { request }, timeout).await)
}

async fn record(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    let request = RequestId::new();
    let timeout = ctx.settings.lifecycle_timeout() + Duration::from_secs(1);
    Json(dispatch(&ctx, request, Event::NodeRecord { request }, timeout).await)
}

async fn stop_nodes(State(ctx): State<Arc<Ctx>>) -> Json<ApiResponse> {
    let request = RequestId::new();
    let timeout = ctx.settings.lifecycle_timeout() + Duration::from_secs(1);
    Json(dispatch(&ctx, request, Event::NodeStop { request }, timeout).await)
}

#[derive(Deserialize)]
struct MethodBody {
    node_id: NodeId,
    method_name: String,
    #[serde(default)]
    params: serde_json::Map<String, serde_json::Value>,
    /// Seconds, matching the request envelope.
    #[serde(default)]
    timeout: Option<f64>,
}

async fn registered_method(
    State(ctx): State<Arc<Ctx>>,
    Json(body): Json<MethodBody>,
) -> Json<ApiResponse> {
    let request = RequestId::new();
    let timeout_ms = body.timeout.map(|s| (s * 1000.0) as u64).unwrap_or(10_000);
    let event = Event::NodeMethod {
        node_id: body.node_id,
        method: body.method_name,
        params: body.params,
        timeout_ms,
        request,
    };

    let Ok((observer, mut results)) =
        ctx.bus.subscribe_sink(Some("node:method_result")).await
    else {
        return Json(ApiResponse::err(ErrorBody::new("protocol-error", "bus closed")));
    };
    ctx.bus.publish(event);

    let wait = Duration::from_millis(timeout_ms) + Duration::from_secs(1);
    let response = tokio::time::timeout(wait, async {
        while let Some(result) = results.recv().await {
            match result {
                Event::NodeMethodResult { request: r, success: true, output, .. }
                    if r == request =>
                {
                    return ApiResponse::ok_with(output.unwrap_or(serde_json::Value::Null));
                }
                Event::NodeMethodResult { request: r, error, .. } if r == request => {
                    return ApiResponse::err(ErrorBody::new(
                        "lifecycle-error",
                        error.unwrap_or_else(|| "method failed".to_string()),
                    ));
                }
                _ => {}
            }
        }
        ApiResponse::err(ErrorBody::new("protocol-error", "bus closed"))
    })
    .await
    .unwrap_or_else(|_| {
        ApiResponse::err(ErrorBody::new(
            "timeout-error",
            format!("method result not received within {timeout_ms}ms"),
        ))
    });
    ctx.bus.unsubscribe(observer);
    Json(response)
}

#[derive(Deserialize)]
struct PackagesBody {
    #[serde(default)]
    packages: Vec<String>,
}

async fn load_packages(
    State(ctx): State<Arc<Ctx>>,
    Json(body): Json<PackagesBody>,
) -> Json<ApiResponse> {
    let request = RequestId::new();
    let timeout = ctx.settings.package_delivery_timeout() + Duration::from_secs(1);
    Json(
        dispatch(&ctx, request, Event::PackageLoad { packages: body.packages, request }, timeout)
            .await,
    )
}

async fn report_state(State(ctx): State<Arc<Ctx>>) -> Json<WorkerState> {
    Json(ctx.state.lock().clone())
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
