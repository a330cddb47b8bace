// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-package staging.
//!
//! Packages arrive through the server's file intake ahead of the
//! `/packages/load` call. Loading waits for the named transfers to
//! complete within `worker.timeout.package-delivery`, then moves them
//! into the package directory, keyed by name. Node kinds are resolved by
//! identifier against the factory registry, never by executing package
//! content.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use trellis_core::{ErrorBody, Event, RequestId, Settings};
use trellis_net::HttpServer;
use trellis_runtime::{EventBus, Service, ServiceError, TypedObserver};

pub struct PackageService {
    bus: EventBus,
    server: HttpServer,
    packages_dir: PathBuf,
    settings: Settings,
    loaded: Mutex<Vec<String>>,
}

impl PackageService {
    pub fn new(
        bus: EventBus,
        server: HttpServer,
        packages_dir: PathBuf,
        settings: Settings,
    ) -> Self {
        Self { bus, server, packages_dir, settings, loaded: Mutex::new(Vec::new()) }
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().clone()
    }

    /// Wait for the named uploads to complete, then stage them.
    async fn load(&self, packages: Vec<String>) -> Result<(), ErrorBody> {
        let timeout = self.settings.package_delivery_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        'next: for package in &packages {
            loop {
                // Uploads are keyed by whatever sender id the manager
                // used; search every sender's transfer table.
                let found = self.find_complete(package);
                if let Some(src) = found {
                    self.stage(package, &src).await?;
                    continue 'next;
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(ErrorBody::new(
                        "timeout-error",
                        format!("package {package} not delivered within {}ms", timeout.as_millis()),
                    ));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        Ok(())
    }

    fn find_complete(&self, package: &str) -> Option<PathBuf> {
        for sender in self.server.client_ids().into_iter().chain(self.known_senders()) {
            let transfers = self.server.transfers(&sender);
            if let Some(record) = transfers.get(package) {
                if record.complete {
                    return Some(record.dst_filepath.clone());
                }
            }
        }
        None
    }

    // Senders that uploaded without holding a live WS registration.
    fn known_senders(&self) -> Vec<String> {
        vec!["manager".to_string()]
    }

    async fn stage(&self, package: &str, src: &PathBuf) -> Result<(), ErrorBody> {
        tokio::fs::create_dir_all(&self.packages_dir)
            .await
            .map_err(|e| ErrorBody::new("transport-error", e.to_string()))?;
        let dst = self.packages_dir.join(package);
        tokio::fs::copy(src, &dst)
            .await
            .map_err(|e| ErrorBody::new("transport-error", e.to_string()))?;
        self.loaded.lock().push(package.to_string());
        tracing::info!(package, dst = %dst.display(), "package staged");
        Ok(())
    }

    fn ack(&self, request: RequestId, result: Result<(), ErrorBody>) {
        let event = match result {
            Ok(()) => Event::CommandDone { request, success: true, error: None, value: None },
            Err(error) => {
                Event::CommandDone { request, success: false, error: Some(error), value: None }
            }
        };
        self.bus.publish(event);
    }
}

/// Subscribe the `package:load` observer.
pub async fn subscribe_observers(
    service: Arc<PackageService>,
    bus: &EventBus,
) -> Result<(), trellis_runtime::BusError> {
    let observer = {
        let service = Arc::clone(&service);
        TypedObserver::on("package:load", move |event| {
            let service = Arc::clone(&service);
            async move {
                if let Event::PackageLoad { packages, request } = event {
                    let result = service.load(packages).await;
                    service.ack(request, result);
                }
                Ok(())
            }
        })
    };
    bus.subscribe(observer).await?;
    Ok(())
}

#[async_trait]
impl Service for PackageService {
    fn name(&self) -> &'static str {
        "packages"
    }
}

#[cfg(test)]
#[path = "packages_tests.rs"]
mod tests;
