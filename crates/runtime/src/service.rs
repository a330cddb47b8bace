// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service composition.
//!
//! A [`Service`] owns a name, a `start`, and a `shutdown`; it subscribes its
//! bus observers in its constructor. A [`ServiceGroup`] applies an operation
//! across members, optionally in a caller-supplied order, serially or
//! concurrently. This is the only composition primitive — Manager and Worker
//! are each a group plus shared state and a bus; there is no inheritance
//! among services.

use async_trait::async_trait;
use futures_util::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("service {service}: {detail}")]
pub struct ServiceError {
    pub service: String,
    pub detail: String,
}

impl ServiceError {
    pub fn new(service: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self { service: service.into(), detail: detail.to_string() }
    }
}

/// A single-responsibility unit living on the process loop.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Which lifecycle method to apply across a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOp {
    Start,
    Shutdown,
}

/// Ordered collection of services.
#[derive(Default)]
pub struct ServiceGroup {
    services: IndexMap<&'static str, Arc<dyn Service>>,
}

impl ServiceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, service: Arc<dyn Service>) -> &mut Self {
        self.services.insert(service.name(), service);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Service>> {
        self.services.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.services.keys().copied()
    }

    async fn invoke(service: &Arc<dyn Service>, op: ServiceOp) -> Result<(), ServiceError> {
        match op {
            ServiceOp::Start => service.start().await,
            ServiceOp::Shutdown => service.shutdown().await,
        }
    }

    /// Apply `op` serially. With `order`, named members run first in that
    /// order, then the rest in insertion order; unknown names are skipped.
    /// Fails fast on the first error.
    pub async fn apply(&self, op: ServiceOp, order: &[&str]) -> Result<(), ServiceError> {
        for name in order {
            if let Some(service) = self.services.get(name) {
                Self::invoke(service, op).await?;
            }
        }
        for (name, service) in &self.services {
            if order.contains(name) {
                continue;
            }
            Self::invoke(service, op).await?;
        }
        Ok(())
    }

    /// Apply `op` to every member concurrently, collecting per-service
    /// failures instead of failing fast.
    pub async fn apply_concurrent(&self, op: ServiceOp) -> Vec<ServiceError> {
        let results = join_all(
            self.services.values().map(|service| Self::invoke(service, op)),
        )
        .await;
        results.into_iter().filter_map(Result::err).collect()
    }

    /// Shut every member down in reverse insertion order. Errors are
    /// collected, not propagated, so a failing service cannot block the
    /// teardown of the ones before it.
    pub async fn shutdown_reverse(&self) -> Vec<ServiceError> {
        let mut errors = Vec::new();
        for service in self.services.values().rev() {
            if let Err(e) = service.shutdown().await {
                tracing::warn!(service = e.service, error = %e.detail, "shutdown failed");
                errors.push(e);
            }
        }
        errors
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
