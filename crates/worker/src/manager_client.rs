// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker's client side of the manager relationship: registration
//! (idempotent by worker id), periodic heartbeats carrying a WorkerState
//! snapshot, artifact upload after collect, and deregistration.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trellis_core::{TransportError, WorkerState};
use trellis_net::HttpClient;
use trellis_record::RecordRange;
use trellis_runtime::{Service, ServiceError};

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(2);

pub struct ManagerClientService {
    state: Arc<Mutex<WorkerState>>,
    client: Mutex<Option<HttpClient>>,
    record_dir: PathBuf,
    delete_after_transfer: bool,
    heartbeat_cancel: CancellationToken,
}

impl ManagerClientService {
    pub fn new(
        state: Arc<Mutex<WorkerState>>,
        record_dir: PathBuf,
        delete_after_transfer: bool,
    ) -> Self {
        Self {
            state,
            client: Mutex::new(None),
            record_dir,
            delete_after_transfer,
            heartbeat_cancel: CancellationToken::new(),
        }
    }

    fn no_manager(&self) -> TransportError {
        TransportError { peer: "manager".to_string(), detail: "not connected".to_string() }
    }

    pub fn is_connected(&self) -> bool {
        self.client.lock().is_some()
    }

    /// Register with the manager and start heartbeating.
    pub async fn register(&self, host: &str, port: u16) -> Result<(), TransportError> {
        let client = HttpClient::new(host, port);
        let snapshot = self.state.lock().clone();
        let response = client.post("/workers/register", &snapshot).await?;
        if !response.success {
            return Err(TransportError {
                peer: client.base_url().to_string(),
                detail: response
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "registration refused".to_string()),
            });
        }
        tracing::info!(manager = %client.base_url(), worker = %snapshot.id, "registered");
        *self.client.lock() = Some(client.clone());

        let state = Arc::clone(&self.state);
        let cancel = self.heartbeat_cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = state.lock().clone();
                        // Best effort; failures are retried next tick.
                        if let Err(e) = client.post("/workers/heartbeat", &snapshot).await {
                            tracing::debug!(error = %e, "heartbeat failed");
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });
        Ok(())
    }

    pub async fn deregister(&self) -> Result<(), TransportError> {
        let client = self.client.lock().clone().ok_or_else(|| self.no_manager())?;
        let id = self.state.lock().id;
        client.post("/workers/deregister", &serde_json::json!({ "id": id })).await?;
        tracing::info!(worker = %id, "deregistered");
        Ok(())
    }

    /// Upload every staged artifact plus the recorded ranges.
    pub async fn send_archive(
        &self,
        ranges: BTreeMap<String, RecordRange>,
    ) -> Result<(), TransportError> {
        let client = self.client.lock().clone().ok_or_else(|| self.no_manager())?;
        let (id, name) = {
            let state = self.state.lock();
            (state.id, state.name.clone())
        };

        let files = collect_files(&self.record_dir);
        for path in &files {
            let relative = path
                .strip_prefix(&self.record_dir)
                .unwrap_or(path)
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            let content = tokio::fs::read(path).await.map_err(|e| TransportError {
                peer: client.base_url().to_string(),
                detail: format!("read {}: {e}", path.display()),
            })?;
            let response = client.upload_file(id.as_str(), &relative, &content).await?;
            if !response.success {
                return Err(TransportError {
                    peer: client.base_url().to_string(),
                    detail: format!("upload of {relative} refused"),
                });
            }
        }
        client
            .post(
                "/workers/collected",
                &serde_json::json!({ "id": id, "name": name, "ranges": ranges }),
            )
            .await?;
        tracing::info!(worker = %id, files = files.len(), "archive transferred");

        if self.delete_after_transfer {
            for path in &files {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::warn!(path = %path.display(), error = %e, "cleanup failed");
                }
            }
        }
        Ok(())
    }
}

/// Recursively list regular files under `dir`.
fn collect_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

#[async_trait]
impl Service for ManagerClientService {
    fn name(&self) -> &'static str {
        "manager-client"
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        self.heartbeat_cancel.cancel();
        if self.is_connected() {
            if let Err(e) = self.deregister().await {
                tracing::debug!(error = %e, "deregister on shutdown failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "manager_client_tests.rs"]
mod tests;
