// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! trellis-manager: the cluster coordinator.
//!
//! One manager per cluster. It accepts worker registrations, commits
//! graphs, drives the lifecycle, collects artifacts into a session
//! directory, and streams network state to UI clients over WebSocket.
//! Like the worker it is a service group over an evented `ManagerState`
//! and a bus.

pub mod discovery;
pub mod http_server;
pub mod lock;
pub mod log_sink;
pub mod session;
pub mod worker_handler;

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use trellis_core::{
    CommitError, ErrorBody, Event, Graph, ManagerId, ManagerState, Mapping, NodeId, Settings,
    TransportError, WorkerId,
};
use trellis_net::{HttpServer, NetError, ServerConfig};
use trellis_runtime::{
    EventBus, Evented, ServiceError, ServiceGroup, ServiceOp, TypedObserver,
};

pub use discovery::{Discovery, DiscoveryInfo, DiscoveryService, NullDiscovery, UdpBeacon};
pub use http_server::HttpServerService;
pub use log_sink::LogSinkService;
pub use session::SessionService;
pub use worker_handler::{CommitOptions, PackageFile, WorkerHandler};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error("{op} partially completed: {} ok, {} failed", succeeded.len(), failed.len())]
    Partial {
        op: String,
        succeeded: Vec<WorkerId>,
        failed: Vec<(WorkerId, String)>,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Net(#[from] NetError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("another manager holds the lock on {0}")]
    Locked(PathBuf),
}

impl ManagerError {
    pub fn to_body(&self) -> ErrorBody {
        match self {
            ManagerError::Commit(e) => ErrorBody::from(e),
            ManagerError::Transport(e) => ErrorBody::from(e),
            other => ErrorBody::new("lifecycle-error", other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct ManagerConfig {
    /// HTTP port (0 = OS-chosen).
    pub port: u16,
    pub logdir: PathBuf,
    pub session_name: String,
    pub settings: Settings,
    /// Advertise over discovery at startup.
    pub discovery_enabled: bool,
}

impl ManagerConfig {
    pub fn new(logdir: PathBuf) -> Self {
        Self {
            port: 0,
            logdir,
            session_name: "session".to_string(),
            settings: Settings::default(),
            discovery_enabled: false,
        }
    }
}

/// A running manager.
pub struct Manager {
    id: ManagerId,
    state: Evented<ManagerState>,
    bus: EventBus,
    services: ServiceGroup,
    worker_handler: Arc<WorkerHandler>,
    http: Arc<HttpServerService>,
    session: Arc<SessionService>,
    shutdown_notify: Arc<Notify>,
    shut_down: Mutex<bool>,
    // Held for the process lifetime; releases the logdir on drop.
    _lock: lock::InstanceLock,
}

impl Manager {
    pub async fn start(config: ManagerConfig) -> Result<Self, ManagerError> {
        tokio::fs::create_dir_all(&config.logdir).await?;
        let instance_lock = lock::InstanceLock::acquire(&config.logdir)
            .map_err(|_| ManagerError::Locked(config.logdir.clone()))?;

        let id = ManagerId::new();
        let bus = EventBus::new();
        let state = Evented::new(
            ManagerState::new(id, config.logdir.clone()),
            "ManagerState",
            bus.clone(),
        );

        let staging_dir = config.logdir.join(".incoming");
        let (server, incoming_rx) = HttpServer::new(ServerConfig {
            id: id.to_string(),
            port: config.port,
            max_backpressure_frames: config.settings.ws.max_backpressure_frames,
            staging_dir: Some(staging_dir.clone()),
        });

        let worker_handler = Arc::new(WorkerHandler::new(
            state.clone(),
            bus.clone(),
            config.settings.clone(),
        ));
        let session = Arc::new(SessionService::new(
            config.logdir.clone(),
            config.session_name.clone(),
            staging_dir,
            bus.clone(),
        ));
        let log_sink = Arc::new(LogSinkService::new(state.clone(), config.logdir.clone()));
        let discovery = Arc::new(DiscoveryService::new(
            Box::new(NullDiscovery),
            config.discovery_enabled,
        ));
        let http = Arc::new(HttpServerService::new(
            server,
            incoming_rx,
            bus.clone(),
            state.clone(),
            Arc::clone(&worker_handler),
            Arc::clone(&session),
            Arc::clone(&discovery),
        ));

        let mut services = ServiceGroup::new();
        services.add(Arc::clone(&log_sink) as Arc<dyn trellis_runtime::Service>);
        services.add(Arc::clone(&session) as Arc<dyn trellis_runtime::Service>);
        services.add(Arc::clone(&worker_handler) as Arc<dyn trellis_runtime::Service>);
        services.add(Arc::clone(&http) as Arc<dyn trellis_runtime::Service>);
        services.add(Arc::clone(&discovery) as Arc<dyn trellis_runtime::Service>);
        services.apply(ServiceOp::Start, &[]).await?;

        let port = http.port();
        state.mutate(|s| {
            s.ip = "127.0.0.1".to_string();
            s.port = port;
        });
        if config.discovery_enabled {
            discovery
                .enable(DiscoveryInfo { id: id.to_string(), host: "127.0.0.1".into(), port })
                .await;
        }

        let shutdown_notify = Arc::new(Notify::new());
        let notify = Arc::clone(&shutdown_notify);
        bus.subscribe(TypedObserver::trigger("system:shutdown", move || {
            let notify = Arc::clone(&notify);
            async move {
                notify.notify_waiters();
                Ok(())
            }
        }))
        .await
        .map_err(|e| ServiceError::new("manager", e))?;

        tracing::info!(manager = %id, port, "manager started");
        Ok(Self {
            id,
            state,
            bus,
            services,
            worker_handler,
            http,
            session,
            shutdown_notify,
            shut_down: Mutex::new(false),
            _lock: instance_lock,
        })
    }

    pub fn id(&self) -> ManagerId {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.http.port()
    }

    pub fn host(&self) -> String {
        self.state.read(|s| s.ip.clone())
    }

    pub fn state_snapshot(&self) -> ManagerState {
        self.state.snapshot()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn session(&self) -> &Arc<SessionService> {
        &self.session
    }

    /// Commit a graph across the registered workers.
    pub async fn commit_graph(
        &self,
        graph: Graph,
        mapping: Mapping,
        options: CommitOptions,
    ) -> Result<(), CommitError> {
        self.worker_handler.commit_graph(graph, mapping, options).await
    }

    pub async fn start_pipeline(&self) -> Result<(), ManagerError> {
        self.worker_handler.start_pipeline().await
    }

    pub async fn record(&self) -> Result<(), ManagerError> {
        self.worker_handler.record().await
    }

    pub async fn stop(&self) -> Result<(), ManagerError> {
        self.worker_handler.stop().await
    }

    pub async fn collect(&self) -> Result<(), ManagerError> {
        self.worker_handler.collect().await
    }

    /// Back to a pristine state; safe to call mid-commit.
    pub async fn reset(&self, keep_workers: bool) -> Result<(), ManagerError> {
        self.worker_handler.reset(keep_workers).await
    }

    pub async fn request_registered_method(
        &self,
        node_id: NodeId,
        method: &str,
        params: serde_json::Map<String, serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ErrorBody> {
        self.worker_handler.request_registered_method(node_id, method, params, timeout).await
    }

    /// Park until a shutdown is requested.
    pub async fn idle(&self) {
        self.shutdown_notify.notified().await;
    }

    /// Stop all workers, then tear services down in reverse dependency
    /// order. Idempotent.
    pub async fn shutdown(&self) {
        {
            let mut done = self.shut_down.lock();
            if *done {
                return;
            }
            *done = true;
        }
        self.worker_handler.shutdown_workers().await;
        self.services.shutdown_reverse().await;
        self.bus.publish(Event::Shutdown);
        tracing::info!(manager = %self.id, "manager shut down");
    }
}
