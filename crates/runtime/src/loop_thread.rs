// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A dedicated OS thread hosting one cooperative event loop.
//!
//! All I/O-bound services of a process live on such a loop; thread-mode
//! nodes each own one so CPU-heavy `step` bodies never stall a worker's
//! service loop.

use std::future::Future;
use std::sync::mpsc as std_mpsc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum LoopThreadError {
    #[error("failed to spawn loop thread: {0}")]
    Spawn(String),
    #[error("loop thread terminated before reporting readiness")]
    Startup,
}

/// Handle to a dedicated loop thread.
pub struct AsyncLoopThread {
    handle: tokio::runtime::Handle,
    cancel: CancellationToken,
    join: Option<std::thread::JoinHandle<()>>,
    name: String,
}

impl AsyncLoopThread {
    /// Spawn a named OS thread running a current-thread runtime.
    pub fn new(name: impl Into<String>) -> Result<Self, LoopThreadError> {
        let name = name.into();
        let cancel = CancellationToken::new();
        let thread_cancel = cancel.clone();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                // Park the loop until stop(); dropping the runtime afterwards
                // cancels any tasks still pending.
                runtime.block_on(thread_cancel.cancelled());
            })
            .map_err(|e| LoopThreadError::Spawn(e.to_string()))?;

        let handle = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(detail)) => return Err(LoopThreadError::Spawn(detail)),
            Err(_) => return Err(LoopThreadError::Startup),
        };

        Ok(Self { handle, cancel, join: Some(join), name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schedule a future on the loop; the returned handle resolves with its
    /// result (or its error if the loop is stopped first).
    pub fn exec<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run a synchronous callable on the loop thread.
    pub fn exec_blocking<R>(&self, f: impl FnOnce() -> R + Send + 'static) -> JoinHandle<R>
    where
        R: Send + 'static,
    {
        self.handle.spawn(async move { f() })
    }

    /// Cancel outstanding tasks and join the thread. Idempotent.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::warn!(thread = %self.name, "loop thread panicked during shutdown");
            }
        }
    }
}

impl Drop for AsyncLoopThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "loop_thread_tests.rs"]
mod tests;
