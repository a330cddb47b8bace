// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! trellis-worker: one worker daemon per host.
//!
//! A worker registers with a manager, hosts the nodes assigned to it,
//! wires their control channels, and relays status and artifacts back.
//! It is a service group over a shared `WorkerState` and event bus:
//! the HTTP server (routes → bus events), the node handler (spawn and
//! supervise), the package service, and the manager client.

pub mod http_server;
pub mod manager_client;
pub mod node_handler;
pub mod packages;

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use trellis_core::{Event, Settings, WorkerId, WorkerState};
use trellis_net::{HttpServer, NetError, ServerConfig};
use trellis_node::NodeRegistry;
use trellis_runtime::{
    EventBus, ServiceError, ServiceGroup, ServiceOp, TypedObserver,
};

pub use http_server::HttpServerService;
pub use manager_client::ManagerClientService;
pub use node_handler::NodeHandler;
pub use packages::PackageService;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Net(#[from] NetError),
    #[error("manager: {0}")]
    Manager(#[from] trellis_core::TransportError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct WorkerConfig {
    pub name: String,
    /// Stable id; generated when absent.
    pub id: Option<WorkerId>,
    /// HTTP port (0 = OS-chosen).
    pub port: u16,
    /// Staging area for records, packages, and uploads.
    pub state_dir: PathBuf,
    pub settings: Settings,
    /// Remove local artifacts after a successful transfer to the manager.
    pub delete_after_transfer: bool,
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>, state_dir: PathBuf) -> Self {
        Self {
            name: name.into(),
            id: None,
            port: 0,
            state_dir,
            settings: Settings::default(),
            delete_after_transfer: true,
        }
    }
}

/// A running worker.
pub struct Worker {
    id: WorkerId,
    state: Arc<Mutex<WorkerState>>,
    bus: EventBus,
    services: ServiceGroup,
    http: Arc<HttpServerService>,
    node_handler: Arc<NodeHandler>,
    manager_client: Arc<ManagerClientService>,
    shutdown_notify: Arc<Notify>,
    shut_down: Mutex<bool>,
}

impl Worker {
    /// Build the service group, bind the HTTP server, and start services.
    pub async fn start(config: WorkerConfig, registry: NodeRegistry) -> Result<Self, WorkerError> {
        let id = config.id.unwrap_or_default();
        let mut state = WorkerState::new(id, config.name.clone());
        state.ip = "127.0.0.1".to_string();
        let state = Arc::new(Mutex::new(state));
        let bus = EventBus::new();

        let record_dir = config.state_dir.join("session");
        let staging_dir = config.state_dir.join("staging");
        tokio::fs::create_dir_all(&record_dir).await?;
        tokio::fs::create_dir_all(&staging_dir).await?;

        let (server, incoming_rx) = HttpServer::new(ServerConfig {
            id: id.to_string(),
            port: config.port,
            max_backpressure_frames: config.settings.ws.max_backpressure_frames,
            staging_dir: Some(staging_dir.clone()),
        });

        let node_handler = Arc::new(NodeHandler::new(
            Arc::clone(&state),
            bus.clone(),
            registry,
            config.settings.clone(),
            record_dir.clone(),
            config.state_dir.join("node-configs"),
        ));
        let manager_client = Arc::new(ManagerClientService::new(
            Arc::clone(&state),
            record_dir,
            config.delete_after_transfer,
        ));
        let package_service = Arc::new(PackageService::new(
            bus.clone(),
            server.clone(),
            config.state_dir.join("packages"),
            config.settings.clone(),
        ));
        let http = Arc::new(HttpServerService::new(
            server,
            incoming_rx,
            bus.clone(),
            Arc::clone(&state),
            Arc::clone(&node_handler),
            Arc::clone(&manager_client),
            config.settings.clone(),
        ));

        node_handler::subscribe_observers(Arc::clone(&node_handler), &bus)
            .await
            .map_err(|e| ServiceError::new("node-handler", e))?;
        packages::subscribe_observers(Arc::clone(&package_service), &bus)
            .await
            .map_err(|e| ServiceError::new("packages", e))?;

        let mut services = ServiceGroup::new();
        services.add(Arc::clone(&node_handler) as Arc<dyn trellis_runtime::Service>);
        services.add(Arc::clone(&package_service) as Arc<dyn trellis_runtime::Service>);
        services.add(Arc::clone(&http) as Arc<dyn trellis_runtime::Service>);
        services.add(Arc::clone(&manager_client) as Arc<dyn trellis_runtime::Service>);
        services.apply(ServiceOp::Start, &[]).await?;

        {
            let mut guard = state.lock();
            guard.port = http.port();
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
        .map_err(|e| ServiceError::new("worker", e))?;

        tracing::info!(worker = %id, name = %config.name, port = http.port(), "worker started");
        Ok(Self {
            id,
            state,
            bus,
            services,
            http,
            node_handler,
            manager_client,
            shutdown_notify,
            shut_down: Mutex::new(false),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.http.port()
    }

    pub fn state_snapshot(&self) -> WorkerState {
        self.state.lock().clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn node_handler(&self) -> &Arc<NodeHandler> {
        &self.node_handler
    }

    /// Register with the manager at `(host, port)`. Also fixes up our
    /// advertised ip from the socket the manager actually sees.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), WorkerError> {
        if let Ok(probe) = tokio::net::TcpStream::connect((host, port)).await {
            if let Ok(local) = probe.local_addr() {
                self.state.lock().ip = local.ip().to_string();
            }
        }
        self.manager_client.register(host, port).await?;
        Ok(())
    }

    /// Park until a shutdown is requested via `/shutdown` or the bus.
    pub async fn idle(&self) {
        self.shutdown_notify.notified().await;
    }

    /// Tear everything down in reverse dependency order. Idempotent.
    pub async fn shutdown(&self) {
        {
            let mut done = self.shut_down.lock();
            if *done {
                return;
            }
            *done = true;
        }
        self.services.shutdown_reverse().await;
        self.bus.publish(Event::Shutdown);
        tracing::info!(worker = %self.id, "worker shut down");
    }
}
