// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-mode node hosting.
//!
//! A subordinate process built from the same binary connects back to its
//! worker's WebSocket, receives `NodeCommand` frames on it, and reports
//! through a [`WsLink`]. The runner is identical to thread mode.

use crate::factory::{FactoryError, NodeRegistry};
use crate::link::WsLink;
use crate::runner::{NodeCommand, NodeRunner, RunnerConfig};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use trellis_core::SystemClock;
use trellis_net::client::WsClientConfig;
use trellis_net::{NetError, WsClient};

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Factory(#[from] FactoryError),
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Run one node against its worker until shutdown.
pub async fn run_node_host(
    registry: &NodeRegistry,
    worker_ws_url: String,
    runner_config: RunnerConfig,
) -> Result<(), HostError> {
    let node = registry.build(&runner_config.config.spec)?;
    let node_id = runner_config.config.spec.id;

    let settings = &runner_config.settings;
    let (client, mut incoming) = WsClient::connect(WsClientConfig {
        url: worker_ws_url,
        id: node_id.to_string(),
        backoff_base: settings.reconnect_base(),
        backoff_cap: settings.reconnect_cap(),
        connect_timeout: Duration::from_secs(10),
    })
    .await?;

    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(frame) = incoming.recv().await {
            match serde_json::from_value::<NodeCommand>(frame) {
                Ok(command) => {
                    if ctrl_tx.send(command).is_err() {
                        return;
                    }
                }
                // Frames that are not commands (acks, echoes) are ignored.
                Err(_) => {}
            }
        }
    });

    let link = Arc::new(WsLink::new(client));
    NodeRunner::new(node, runner_config, ctrl_rx, link, SystemClock).run().await;
    Ok(())
}
