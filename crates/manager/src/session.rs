// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session archive.
//!
//! Worker uploads land in a staging area keyed by worker id; when a
//! worker reports its collect, the staged files move into
//! `logdir/session_name/` and `meta.json` is updated with the recorded
//! stream ranges.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use trellis_core::{Event, WorkerId};
use trellis_record::{RecordRange, SessionMeta};
use trellis_runtime::{EventBus, Service, ServiceError};

pub struct SessionService {
    logdir: PathBuf,
    session_name: String,
    staging_dir: PathBuf,
    bus: EventBus,
    meta: Mutex<SessionMeta>,
}

impl SessionService {
    pub fn new(logdir: PathBuf, session_name: String, staging_dir: PathBuf, bus: EventBus) -> Self {
        let meta = SessionMeta::new(session_name.clone());
        Self { logdir, session_name, staging_dir, bus, meta: Mutex::new(meta) }
    }

    pub fn session_dir(&self) -> PathBuf {
        self.logdir.join(&self.session_name)
    }

    pub fn meta_snapshot(&self) -> SessionMeta {
        self.meta.lock().clone()
    }

    /// Ingest one worker's collect: move its staged uploads into the
    /// session directory and merge its stream ranges into the metadata.
    pub async fn ingest_worker(
        &self,
        worker_id: WorkerId,
        worker_name: &str,
        ranges: BTreeMap<String, RecordRange>,
    ) -> Result<(), ServiceError> {
        let session_dir = self.session_dir();
        tokio::fs::create_dir_all(&session_dir)
            .await
            .map_err(|e| ServiceError::new("session", e))?;

        let staged = self.staging_dir.join(worker_id.as_str());
        if staged.is_dir() {
            move_tree(&staged, &session_dir).map_err(|e| ServiceError::new("session", e))?;
        }

        let meta_path = {
            let mut meta = self.meta.lock();
            meta.add_records(worker_name, ranges);
            meta.save(&session_dir).map_err(|e| ServiceError::new("session", e))?;
            session_dir.join("meta.json")
        };
        tracing::info!(worker = %worker_id, meta = %meta_path.display(), "session updated");
        self.bus.publish(Event::SessionSaved { session: self.session_name.clone() });
        Ok(())
    }
}

/// Move every file under `src` to the same relative path under `dst`.
fn move_tree(src: &PathBuf, dst: &PathBuf) -> std::io::Result<()> {
    let mut stack = vec![src.clone()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let relative = path.strip_prefix(src).unwrap_or(&path);
            let target = dst.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // Rename within a filesystem; fall back to copy across mounts.
            if std::fs::rename(&path, &target).is_err() {
                std::fs::copy(&path, &target)?;
                std::fs::remove_file(&path)?;
            }
        }
    }
    let _ = std::fs::remove_dir_all(src);
    Ok(())
}

#[async_trait]
impl Service for SessionService {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        // Persist whatever the session has seen so far.
        let session_dir = self.session_dir();
        if !self.meta.lock().records.is_empty() {
            std::fs::create_dir_all(&session_dir)
                .map_err(|e| ServiceError::new("session", e))?;
            self.meta
                .lock()
                .save(&session_dir)
                .map_err(|e| ServiceError::new("session", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
