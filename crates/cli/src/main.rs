// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! trellis: entry points for the manager and worker daemons.
//!
//! Exit codes: 0 normal, 1 connection failure, 2 invalid arguments
//! (clap's default).

mod exit_error;
mod logging;

use clap::{Parser, Subcommand};
use exit_error::ExitError;
use std::path::PathBuf;
use trellis_core::{Settings, WorkerId};
use trellis_manager::{Manager, ManagerConfig};
use trellis_node::host::run_node_host;
use trellis_node::{NodeRegistry, RunnerConfig};
use trellis_worker::{Worker, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "trellis", about = "Distributed pipeline runtime for multimodal capture")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the cluster manager.
    Manager {
        /// HTTP port (0 picks one).
        #[arg(long, default_value_t = 9000)]
        port: u16,
        /// Session and log directory.
        #[arg(long)]
        logdir: Option<PathBuf>,
        /// Session name under the logdir.
        #[arg(long, default_value = "session")]
        session: String,
        /// Advertise over discovery.
        #[arg(long, default_value_t = false)]
        zeroconf: bool,
        /// Optional TOML settings file.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run a worker and connect it to a manager.
    Worker {
        /// Name of the worker.
        #[arg(long)]
        name: String,
        /// Manager's IP address.
        #[arg(long)]
        ip: String,
        /// Manager's port.
        #[arg(long)]
        port: u16,
        /// Stable id; generated when absent.
        #[arg(long)]
        id: Option<String>,
        /// Worker's port.
        #[arg(long, default_value_t = 8080)]
        wport: u16,
        /// Delete the worker's data after transfer to the manager.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        delete: bool,
        /// State directory for records and packages.
        #[arg(long)]
        state_dir: Option<PathBuf>,
        /// Optional TOML settings file.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Host one node in a subordinate process (spawned by a worker).
    #[command(hide = true)]
    NodeHost {
        /// ws:// url of the owning worker's socket.
        #[arg(long)]
        worker_url: String,
        /// Path to the serialized runner config.
        #[arg(long)]
        config_file: PathBuf,
    },
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings, ExitError> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ExitError::new(2, format!("cannot read {}: {e}", path.display())))?;
            Settings::from_toml(&raw)
                .map_err(|e| ExitError::new(2, format!("bad settings: {e}")))
        }
        None => Ok(Settings::default()),
    }
}

fn default_dir(leaf: &str) -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("trellis")
        .join(leaf)
}

async fn run(cli: Cli) -> Result<(), ExitError> {
    match cli.command {
        Commands::Manager { port, logdir, session, zeroconf, config } => {
            let logdir = logdir.unwrap_or_else(|| default_dir("logs"));
            logging::init(&logdir);
            let mut manager_config = ManagerConfig::new(logdir);
            manager_config.port = port;
            manager_config.session_name = session;
            manager_config.discovery_enabled = zeroconf;
            manager_config.settings = load_settings(config.as_ref())?;

            let manager = Manager::start(manager_config)
                .await
                .map_err(|e| ExitError::new(1, e.to_string()))?;
            println!("manager listening on {}:{}", manager.host(), manager.port());

            tokio::select! {
                _ = manager.idle() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            manager.shutdown().await;
            Ok(())
        }

        Commands::Worker { name, ip, port, id, wport, delete, state_dir, config } => {
            let state_dir = state_dir.unwrap_or_else(|| default_dir("worker"));
            logging::init(&state_dir);
            let mut worker_config = WorkerConfig::new(name, state_dir);
            worker_config.id = id.map(WorkerId::from_string);
            worker_config.port = wport;
            worker_config.delete_after_transfer = delete;
            worker_config.settings = load_settings(config.as_ref())?;

            let worker = Worker::start(worker_config, NodeRegistry::with_stock())
                .await
                .map_err(|e| ExitError::new(1, e.to_string()))?;
            worker
                .connect(&ip, port)
                .await
                .map_err(|e| ExitError::new(1, format!("cannot reach manager: {e}")))?;
            println!("worker {} connected to {ip}:{port}", worker.id());

            tokio::select! {
                _ = worker.idle() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            worker.shutdown().await;
            Ok(())
        }

        Commands::NodeHost { worker_url, config_file } => {
            let raw = std::fs::read(&config_file).map_err(|e| {
                ExitError::new(2, format!("cannot read {}: {e}", config_file.display()))
            })?;
            let runner_config: RunnerConfig = serde_json::from_slice(&raw)
                .map_err(|e| ExitError::new(2, format!("bad runner config: {e}")))?;
            run_node_host(&NodeRegistry::with_stock(), worker_url, runner_config)
                .await
                .map_err(|e| ExitError::new(1, e.to_string()))
        }
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;

fn main() {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("error: {e}");
        std::process::exit(e.code);
    }
}
