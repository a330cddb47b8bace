// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP and WebSocket clients.
//!
//! `HttpClient` wraps request/response calls against a peer's control API
//! and the file-upload intake. `WsClient` keeps a persistent registered
//! WebSocket with automatic reconnect under exponential backoff.

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use trellis_core::{ApiResponse, TransportError};

use crate::messages::WsControl;
use crate::NetError;

/// Request helpers against one peer's HTTP API.
#[derive(Clone)]
pub struct HttpClient {
    base: String,
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self { base: format!("http://{host}:{port}"), inner: reqwest::Client::new() }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn transport_err(&self, detail: impl std::fmt::Display) -> TransportError {
        TransportError { peer: self.base.clone(), detail: detail.to_string() }
    }

    /// POST a JSON body, expecting the standard response envelope.
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse, TransportError> {
        self.post_as(path, body).await
    }

    /// POST a JSON body, decoding an arbitrary response shape.
    pub async fn post_as<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, TransportError> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .inner
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_err(e))?;
        response.json().await.map_err(|e| self.transport_err(e))
    }

    /// GET, decoding an arbitrary response shape.
    pub async fn get_as<R: DeserializeOwned>(&self, path: &str) -> Result<R, TransportError> {
        let url = format!("{}{}", self.base, path);
        let response =
            self.inner.get(&url).send().await.map_err(|e| self.transport_err(e))?;
        response.json().await.map_err(|e| self.transport_err(e))
    }

    /// Upload a file to the peer's `/files/upload` intake, zstd-compressed
    /// and checksummed.
    pub async fn upload_file(
        &self,
        sender_id: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<ApiResponse, TransportError> {
        let digest = format!("{:x}", Sha256::digest(content));
        let compressed =
            zstd::encode_all(content, 3).map_err(|e| self.transport_err(e))?;
        let url = format!("{}/files/upload", self.base);
        let response = self
            .inner
            .post(&url)
            .header("x-sender-id", sender_id)
            .header("x-filename", filename)
            .header("x-sha256", digest)
            .header("x-zstd", "1")
            .body(compressed)
            .send()
            .await
            .map_err(|e| self.transport_err(e))?;
        response.json().await.map_err(|e| self.transport_err(e))
    }
}

#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Full ws:// url of the peer's `/ws` endpoint.
    pub url: String,
    /// Our id for the register frame.
    pub id: String,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// How long `connect` waits for the first successful registration.
    pub connect_timeout: Duration,
}

/// Persistent registered WebSocket with automatic reconnect.
#[derive(Debug)]
pub struct WsClient {
    outbound_tx: mpsc::UnboundedSender<serde_json::Value>,
    connected: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl WsClient {
    /// Connect, register, and await the ack. Reconnection afterwards is
    /// automatic with exponential backoff capped at `backoff_cap`.
    pub async fn connect(
        config: WsClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<serde_json::Value>), NetError> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let connect_timeout = config.connect_timeout;
        tokio::spawn(run_client(
            config,
            outbound_rx,
            incoming_tx,
            connected_tx,
            cancel.clone(),
        ));

        let mut ready = connected_rx.clone();
        let client = Self { outbound_tx, connected: connected_rx, cancel };
        let first = tokio::time::timeout(connect_timeout, async {
            loop {
                if *ready.borrow() {
                    return true;
                }
                if ready.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;
        match first {
            Ok(true) => Ok((client, incoming_rx)),
            Ok(false) => Err(NetError::Ws("client task ended before registering".into())),
            Err(_) => {
                client.cancel.cancel();
                Err(NetError::Timeout(connect_timeout))
            }
        }
    }

    /// Queue a frame for sending. Returns false once the client is closed.
    pub fn send(&self, frame: serde_json::Value) -> bool {
        self.outbound_tx.send(frame).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_client(
    config: WsClientConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<serde_json::Value>,
    incoming_tx: mpsc::UnboundedSender<serde_json::Value>,
    connected_tx: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match connect_once(
            &config,
            &mut outbound_rx,
            &incoming_tx,
            &connected_tx,
            &cancel,
        )
        .await
        {
            SessionEnd::Cancelled => return,
            SessionEnd::Registered => attempt = 0,
            SessionEnd::Failed(detail) => {
                tracing::debug!(url = %config.url, %detail, "ws connect failed");
            }
        }
        let _ = connected_tx.send(false);

        // Exponential backoff, capped.
        let exp = config.backoff_base.saturating_mul(2u32.saturating_pow(attempt));
        let delay = exp.min(config.backoff_cap);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

enum SessionEnd {
    /// Got as far as a registered session (resets the backoff).
    Registered,
    Failed(String),
    Cancelled,
}

async fn connect_once(
    config: &WsClientConfig,
    outbound_rx: &mut mpsc::UnboundedReceiver<serde_json::Value>,
    incoming_tx: &mpsc::UnboundedSender<serde_json::Value>,
    connected_tx: &watch::Sender<bool>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (ws, _) = match connect_async(&config.url).await {
        Ok(ok) => ok,
        Err(e) => return SessionEnd::Failed(e.to_string()),
    };
    let (mut sink, mut stream) = ws.split();

    let register = WsControl::Register { id: config.id.clone() };
    let text = serde_json::to_string(&register).unwrap_or_default();
    if sink.send(Message::Text(text.into())).await.is_err() {
        return SessionEnd::Failed("register send failed".into());
    }

    // Await the ack before reporting connected.
    let ack = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Ok(WsControl::Ack { .. }) = serde_json::from_str(&text) {
                        return true;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => return false,
                _ => {}
            }
        }
        false
    })
    .await;
    if !matches!(ack, Ok(true)) {
        return SessionEnd::Failed("no ack".into());
    }
    let _ = connected_tx.send(true);
    tracing::debug!(url = %config.url, "ws registered");

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(value) => {
                        if sink.send(Message::Text(value.to_string().into())).await.is_err() {
                            return SessionEnd::Registered;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Cancelled;
                    }
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(value) => {
                                let _ = incoming_tx.send(value);
                            }
                            Err(e) => tracing::warn!(error = %e, "bad ws frame"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        return SessionEnd::Registered;
                    }
                    _ => {}
                }
            }
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
