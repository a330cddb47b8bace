// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP server with a WebSocket multiplexer and file-transfer intake.
//!
//! Both Manager and Worker embed one of these: they merge their own routes
//! into the built-in `/ws` and `/files/upload` routes. Binding port 0 picks
//! an OS port; the actual address is known after `serve`.
//!
//! WebSocket peers must register with an id as their first frame and are
//! ack'd; afterwards every inbound JSON frame is handed to the owning
//! service as `(sender_id, value)`. Outbound sends go through per-client
//! bounded queues — a client that keeps falling behind is disconnected
//! after `max_backpressure_frames` consecutive drops.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trellis_core::{ApiResponse, ErrorBody};

use crate::messages::WsControl;
use crate::NetError;

/// Per-sender upload bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct FileTransfer {
    pub dst_filepath: PathBuf,
    pub complete: bool,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Id sent back in WS acks.
    pub id: String,
    /// 0 = OS-chosen.
    pub port: u16,
    pub max_backpressure_frames: u32,
    /// Where uploaded files land; uploads are rejected when unset.
    pub staging_dir: Option<PathBuf>,
}

struct ClientSlot {
    tx: mpsc::Sender<String>,
    consecutive_drops: u32,
}

/// Outbound queue depth per WS client.
const CLIENT_QUEUE_DEPTH: usize = 32;

pub(crate) struct ServerShared {
    id: String,
    clients: Mutex<HashMap<String, ClientSlot>>,
    transfers: Mutex<HashMap<String, HashMap<String, FileTransfer>>>,
    incoming_tx: mpsc::UnboundedSender<(String, serde_json::Value)>,
    max_backpressure: u32,
    staging: Option<PathBuf>,
    cancel: CancellationToken,
}

/// A running server bound to its actual address.
pub struct BoundServer {
    pub addr: SocketAddr,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl BoundServer {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

#[derive(Clone)]
pub struct HttpServer {
    shared: Arc<ServerShared>,
    port: u16,
}

impl HttpServer {
    /// Create the server and the channel its inbound WS frames arrive on.
    pub fn new(
        config: ServerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<(String, serde_json::Value)>) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ServerShared {
            id: config.id,
            clients: Mutex::new(HashMap::new()),
            transfers: Mutex::new(HashMap::new()),
            incoming_tx,
            max_backpressure: config.max_backpressure_frames,
            staging: config.staging_dir,
            cancel: CancellationToken::new(),
        });
        (Self { shared, port: config.port }, incoming_rx)
    }

    fn builtin_routes(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_route))
            .route("/files/upload", post(upload_route))
            .with_state(Arc::clone(&self.shared))
    }

    /// Bind and serve the caller's routes merged with the built-ins.
    pub async fn serve(&self, extra: Router) -> Result<BoundServer, NetError> {
        let app = extra.merge(self.builtin_routes());
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(NetError::Bind)?;
        let addr = listener.local_addr()?;
        let cancel = self.shared.cancel.clone();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "http server terminated");
            }
        });
        tracing::info!(%addr, "http server listening");
        Ok(BoundServer { addr, cancel, task })
    }

    /// Send a frame to one registered WS client. Returns false if the
    /// client is unknown or was dropped for backpressure.
    pub fn send_to(&self, client_id: &str, frame: &serde_json::Value) -> bool {
        self.shared.send_to(client_id, frame)
    }

    /// Send a frame to every registered WS client.
    pub fn broadcast(&self, frame: &serde_json::Value) {
        let ids: Vec<String> = self.shared.clients.lock().keys().cloned().collect();
        for id in ids {
            self.shared.send_to(&id, frame);
        }
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.shared.clients.lock().keys().cloned().collect()
    }

    /// Snapshot of one sender's file transfers.
    pub fn transfers(&self, sender: &str) -> HashMap<String, FileTransfer> {
        self.shared.transfers.lock().get(sender).cloned().unwrap_or_default()
    }
}

impl ServerShared {
    fn send_to(&self, client_id: &str, frame: &serde_json::Value) -> bool {
        let text = frame.to_string();
        let mut clients = self.clients.lock();
        let Some(slot) = clients.get_mut(client_id) else {
            return false;
        };
        match slot.tx.try_send(text) {
            Ok(()) => {
                slot.consecutive_drops = 0;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                slot.consecutive_drops += 1;
                if slot.consecutive_drops >= self.max_backpressure {
                    tracing::warn!(
                        client = client_id,
                        drops = slot.consecutive_drops,
                        "disconnecting slow ws client"
                    );
                    clients.remove(client_id);
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                clients.remove(client_id);
                false
            }
        }
    }
}

async fn ws_route(
    State(shared): State<Arc<ServerShared>>,
    upgrade: WebSocketUpgrade,
) -> axum::response::Response {
    upgrade.on_upgrade(move |socket| handle_socket(shared, socket))
}

async fn handle_socket(shared: Arc<ServerShared>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    // First frame must be a register; everything else is a protocol error.
    let sender_id = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<WsControl>(&text) {
                    Ok(WsControl::Register { id }) => break id,
                    _ => {
                        tracing::warn!("ws peer sent non-register first frame");
                        return;
                    }
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            _ => return,
        }
    };

    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE_DEPTH);
    shared
        .clients
        .lock()
        .insert(sender_id.clone(), ClientSlot { tx, consecutive_drops: 0 });

    let ack = WsControl::Ack { server_id: shared.id.clone() };
    let ack_text = serde_json::to_string(&ack).unwrap_or_default();
    if sink.send(Message::Text(ack_text.into())).await.is_err() {
        shared.clients.lock().remove(&sender_id);
        return;
    }
    tracing::debug!(sender = %sender_id, "ws peer registered");

    let cancel = shared.cancel.clone();
    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(value) => {
                                let _ = shared.incoming_tx.send((sender_id.clone(), value));
                            }
                            Err(e) => {
                                tracing::warn!(sender = %sender_id, error = %e, "bad ws frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(sender = %sender_id, error = %e, "ws read error");
                        break;
                    }
                    _ => {}
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Slot dropped by backpressure policy: close the socket.
                    None => break,
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    shared.clients.lock().remove(&sender_id);
    tracing::debug!(sender = %sender_id, "ws peer disconnected");
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Receive one uploaded file. Headers: `x-sender-id`, `x-filename`,
/// optional `x-zstd: 1` (body is zstd-compressed) and `x-sha256`
/// (hex digest of the decompressed content).
async fn upload_route(
    State(shared): State<Arc<ServerShared>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Json<ApiResponse> {
    let Some(staging) = shared.staging.clone() else {
        return Json(ApiResponse::err(ErrorBody::new(
            "protocol-error",
            "this server does not accept uploads",
        )));
    };
    let sender = header(&headers, "x-sender-id").unwrap_or("anonymous").to_string();
    let Some(filename) = header(&headers, "x-filename").map(str::to_string) else {
        return Json(ApiResponse::err(ErrorBody::new("protocol-error", "missing x-filename")));
    };
    // Reject path traversal in the declared name.
    if filename.contains("..") || filename.starts_with('/') {
        return Json(ApiResponse::err(ErrorBody::new("protocol-error", "bad filename")));
    }

    let dst = staging.join(&sender).join(&filename);
    shared.transfers.lock().entry(sender.clone()).or_default().insert(
        filename.clone(),
        FileTransfer { dst_filepath: dst.clone(), complete: false, size: 0 },
    );

    let content = if header(&headers, "x-zstd") == Some("1") {
        match zstd::decode_all(body.as_ref()) {
            Ok(raw) => raw,
            Err(e) => {
                return Json(ApiResponse::err(ErrorBody::new(
                    "protocol-error",
                    format!("zstd decode failed: {e}"),
                )))
            }
        }
    } else {
        body.to_vec()
    };

    if let Some(expected) = header(&headers, "x-sha256") {
        let digest = format!("{:x}", Sha256::digest(&content));
        if !digest.eq_ignore_ascii_case(expected) {
            return Json(ApiResponse::err(ErrorBody::new(
                "protocol-error",
                "checksum mismatch",
            )));
        }
    }

    if let Some(parent) = dst.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return Json(ApiResponse::err(ErrorBody::new("transport-error", e.to_string())));
        }
    }
    if let Err(e) = tokio::fs::write(&dst, &content).await {
        return Json(ApiResponse::err(ErrorBody::new("transport-error", e.to_string())));
    }

    let size = content.len() as u64;
    shared.transfers.lock().entry(sender.clone()).or_default().insert(
        filename.clone(),
        FileTransfer { dst_filepath: dst, complete: true, size },
    );
    tracing::info!(sender = %sender, file = %filename, size, "file received");
    Json(ApiResponse::ok())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
