// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-local asynchronous pub/sub.
//!
//! One dispatch task per bus drains a single queue, so delivery order equals
//! publish order and observer handlers never run in parallel with each other
//! on the same bus. Publishing never blocks; handlers may suspend on I/O.
//! A handler error is logged and does not halt dispatch to other observers.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use trellis_core::Event;

/// Errors from bus operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("event bus is closed")]
    Closed,
    #[error("timed out after {0:?} waiting for event")]
    WaitTimeout(Duration),
}

/// Result type observer handlers return; errors are logged, never fatal.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Handle to a registered observer, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// An async observer bound to an event name (or all events).
///
/// A handler always receives the full [`Event`]; the `trigger`
/// constructor covers the payload-free case.
pub struct TypedObserver {
    filter: Option<&'static str>,
    handler: Handler,
}

impl TypedObserver {
    /// Observe events whose `name()` equals `event_name`.
    pub fn on<F, Fut>(event_name: &'static str, handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            filter: Some(event_name),
            handler: Arc::new(move |event| Box::pin(handler(event))),
        }
    }

    /// Observe every event on the bus.
    pub fn on_any<F, Fut>(handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self { filter: None, handler: Arc::new(move |event| Box::pin(handler(event))) }
    }

    /// Observe an event name, discarding the payload.
    pub fn trigger<F, Fut>(event_name: &'static str, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self::on(event_name, move |_| handler())
    }

    fn matches(&self, event: &Event) -> bool {
        match self.filter {
            Some(name) => event.name() == name,
            None => true,
        }
    }
}

enum BusOp {
    Publish(Event),
    Subscribe(TypedObserver, oneshot::Sender<ObserverId>),
    Unsubscribe(ObserverId),
    Close,
}

/// Cloneable handle to a per-process event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<BusOp>,
}

impl EventBus {
    /// Create a bus and spawn its dispatch task on the current runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(rx));
        Self { tx }
    }

    /// Publish an event. Non-blocking; the dispatch task drains the queue.
    pub fn publish(&self, event: Event) {
        if self.tx.send(BusOp::Publish(event)).is_err() {
            tracing::debug!("publish on closed event bus");
        }
    }

    /// Register an observer. Resolves once the observer is in place, so
    /// setup code can await readiness before publishing.
    pub async fn subscribe(&self, observer: TypedObserver) -> Result<ObserverId, BusError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(BusOp::Subscribe(observer, ack_tx)).map_err(|_| BusError::Closed)?;
        ack_rx.await.map_err(|_| BusError::Closed)
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        let _ = self.tx.send(BusOp::Unsubscribe(id));
    }

    /// Subscribe a channel sink for events matching `filter` (None = all).
    ///
    /// Useful for tests and for awaiting acks without writing an observer.
    pub async fn subscribe_sink(
        &self,
        filter: Option<&'static str>,
    ) -> Result<(ObserverId, mpsc::UnboundedReceiver<Event>), BusError> {
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let observer = TypedObserver {
            filter,
            handler: Arc::new(move |event| {
                let sink_tx = sink_tx.clone();
                Box::pin(async move {
                    let _ = sink_tx.send(event);
                    Ok(())
                })
            }),
        };
        let id = self.subscribe(observer).await?;
        Ok((id, sink_rx))
    }

    /// Wait for the first event matching `pred`, up to `timeout`.
    pub async fn wait_for(
        &self,
        pred: impl Fn(&Event) -> bool + Send + 'static,
        timeout: Duration,
    ) -> Result<Event, BusError> {
        let (id, mut rx) = self.subscribe_sink(None).await?;
        let result = tokio::time::timeout(timeout, async {
            while let Some(event) = rx.recv().await {
                if pred(&event) {
                    return Ok(event);
                }
            }
            Err(BusError::Closed)
        })
        .await;
        self.unsubscribe(id);
        match result {
            Ok(inner) => inner,
            Err(_) => Err(BusError::WaitTimeout(timeout)),
        }
    }

    /// Stop the dispatch task. Queued events ahead of the close are still
    /// delivered. Idempotent.
    pub fn close(&self) {
        let _ = self.tx.send(BusOp::Close);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<BusOp>) {
    let mut next_id: u64 = 0;
    let mut observers: Vec<(ObserverId, TypedObserver)> = Vec::new();

    while let Some(op) = rx.recv().await {
        match op {
            BusOp::Publish(event) => {
                for (id, observer) in &observers {
                    if !observer.matches(&event) {
                        continue;
                    }
                    if let Err(e) = (observer.handler)(event.clone()).await {
                        tracing::warn!(
                            observer = id.0,
                            event = event.name(),
                            error = %e,
                            "observer handler failed"
                        );
                    }
                }
            }
            BusOp::Subscribe(observer, ack) => {
                next_id += 1;
                let id = ObserverId(next_id);
                observers.push((id, observer));
                let _ = ack.send(id);
            }
            BusOp::Unsubscribe(id) => {
                observers.retain(|(oid, _)| *oid != id);
            }
            BusOp::Close => break,
        }
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
