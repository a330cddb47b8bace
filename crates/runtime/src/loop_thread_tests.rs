// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

#[tokio::test]
async fn exec_runs_futures_on_the_loop() {
    let lt = AsyncLoopThread::new("test-loop").unwrap();
    let value = lt.exec(async { 40 + 2 }).await.unwrap();
    assert_eq!(value, 42);
}

#[tokio::test]
async fn exec_blocking_runs_sync_callables() {
    let lt = AsyncLoopThread::new("test-loop").unwrap();
    let thread_name = lt
        .exec_blocking(|| std::thread::current().name().map(str::to_string))
        .await
        .unwrap();
    assert_eq!(thread_name.as_deref(), Some("test-loop"));
}

#[tokio::test]
async fn loop_supports_timers() {
    let lt = AsyncLoopThread::new("timer-loop").unwrap();
    let handle = lt.exec(async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        "done"
    });
    assert_eq!(handle.await.unwrap(), "done");
}

#[tokio::test]
async fn stop_cancels_pending_tasks() {
    let mut lt = AsyncLoopThread::new("stopping-loop").unwrap();
    let handle = lt.exec(async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    });
    lt.stop();
    assert!(handle.await.is_err());
}

#[tokio::test]
async fn stop_is_idempotent() {
    let mut lt = AsyncLoopThread::new("idem-loop").unwrap();
    lt.stop();
    lt.stop();
}

#[test]
fn name_is_retained() {
    let lt = AsyncLoopThread::new("named").unwrap();
    assert_eq!(lt.name(), "named");
}
