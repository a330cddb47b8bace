// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed log sink.
//!
//! Workers and node processes may mirror their log lines as UDP
//! datagrams; the sink appends them to `logdir/logs.jsonl` with arrival
//! metadata. The subscription port is surfaced in `ManagerState`.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use trellis_core::ManagerState;
use trellis_runtime::{Evented, Service, ServiceError};

pub struct LogSinkService {
    state: Evented<ManagerState>,
    logdir: PathBuf,
    cancel: CancellationToken,
    port: Mutex<Option<u16>>,
}

impl LogSinkService {
    pub fn new(state: Evented<ManagerState>, logdir: PathBuf) -> Self {
        Self { state, logdir, cancel: CancellationToken::new(), port: Mutex::new(None) }
    }

    pub fn port(&self) -> Option<u16> {
        *self.port.lock()
    }
}

#[async_trait]
impl Service for LogSinkService {
    fn name(&self) -> &'static str {
        "log-sink"
    }

    async fn start(&self) -> Result<(), ServiceError> {
        let socket = tokio::net::UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|e| ServiceError::new("log-sink", e))?;
        let port = socket.local_addr().map_err(|e| ServiceError::new("log-sink", e))?.port();
        *self.port.lock() = Some(port);
        self.state.mutate(|s| {
            s.logs_subscription_port = Some(port);
            s.log_sink_enabled = true;
        });

        let sink_path = self.logdir.join("logs.jsonl");
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                tokio::select! {
                    received = socket.recv_from(&mut buf) => {
                        let Ok((len, source)) = received else { continue };
                        let line = String::from_utf8_lossy(&buf[..len]);
                        let record = serde_json::json!({
                            "received_at": Utc::now().to_rfc3339(),
                            "source": source.to_string(),
                            "line": line.trim_end(),
                        });
                        if let Err(e) = append_line(&sink_path, &record) {
                            tracing::warn!(error = %e, "log sink append failed");
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });
        tracing::info!(port, "log sink listening");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        self.cancel.cancel();
        self.state.mutate(|s| {
            s.log_sink_enabled = false;
        });
        Ok(())
    }
}

fn append_line(path: &PathBuf, record: &serde_json::Value) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, record).map_err(std::io::Error::other)?;
    file.write_all(b"\n")
}

#[cfg(test)]
#[path = "log_sink_tests.rs"]
mod tests;
