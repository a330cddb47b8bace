// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discovery interface.
//!
//! The manager can advertise itself so workers on the LAN find it without
//! configuration. Only the interface is fixed; the default implementation
//! is a no-op and a simple UDP beacon ships for flat networks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trellis_runtime::{Service, ServiceError};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DiscoveryInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
}

#[async_trait]
pub trait Discovery: Send + Sync {
    async fn advertise(&self, info: DiscoveryInfo);
    async fn withdraw(&self);
}

/// Default: advertise nowhere.
pub struct NullDiscovery;

#[async_trait]
impl Discovery for NullDiscovery {
    async fn advertise(&self, info: DiscoveryInfo) {
        tracing::debug!(id = %info.id, "discovery disabled, not advertising");
    }

    async fn withdraw(&self) {}
}

/// Periodic JSON beacon over UDP broadcast.
pub struct UdpBeacon {
    pub broadcast_port: u16,
    pub period: Duration,
    cancel: Mutex<Option<CancellationToken>>,
}

impl UdpBeacon {
    pub fn new(broadcast_port: u16) -> Self {
        Self { broadcast_port, period: Duration::from_secs(2), cancel: Mutex::new(None) }
    }
}

#[async_trait]
impl Discovery for UdpBeacon {
    async fn advertise(&self, info: DiscoveryInfo) {
        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());
        let target = format!("255.255.255.255:{}", self.broadcast_port);
        let period = self.period;
        tokio::spawn(async move {
            let socket = match tokio::net::UdpSocket::bind(("0.0.0.0", 0)).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "beacon bind failed");
                    return;
                }
            };
            if let Err(e) = socket.set_broadcast(true) {
                tracing::warn!(error = %e, "beacon broadcast flag failed");
                return;
            }
            let payload = serde_json::to_vec(&info).unwrap_or_default();
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = socket.send_to(&payload, &target).await {
                            tracing::debug!(error = %e, "beacon send failed");
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        });
    }

    async fn withdraw(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
    }
}

/// Service wrapper with HTTP-togglable state.
pub struct DiscoveryService {
    inner: Box<dyn Discovery>,
    enabled: Mutex<bool>,
    last_info: Mutex<Option<DiscoveryInfo>>,
    start_enabled: bool,
}

impl DiscoveryService {
    pub fn new(inner: Box<dyn Discovery>, start_enabled: bool) -> Self {
        Self {
            inner,
            enabled: Mutex::new(false),
            last_info: Mutex::new(None),
            start_enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock()
    }

    pub async fn enable(&self, info: DiscoveryInfo) {
        *self.last_info.lock() = Some(info.clone());
        *self.enabled.lock() = true;
        self.inner.advertise(info).await;
    }

    /// Re-enable with the last advertised info.
    pub async fn re_enable(self: &Arc<Self>) -> bool {
        let info = self.last_info.lock().clone();
        match info {
            Some(info) => {
                self.enable(info).await;
                true
            }
            None => false,
        }
    }

    pub async fn disable(&self) {
        *self.enabled.lock() = false;
        self.inner.withdraw().await;
    }

    pub fn starts_enabled(&self) -> bool {
        self.start_enabled
    }
}

#[async_trait]
impl Service for DiscoveryService {
    fn name(&self) -> &'static str {
        "discovery"
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        self.disable().await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
