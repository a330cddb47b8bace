// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The node lifecycle loop.
//!
//! One runner per node, on the node's own loop. Commands arrive on an
//! ordered control channel; stepping is interleaved with command handling
//! so there is never more than one `step` in flight. Source nodes tick at
//! their configured rate; consumers step when fresh upstream chunks
//! arrive.

use crate::link::{LinkEvent, WorkerLink};
use crate::node::{Node, StepInputs};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use trellis_core::{
    Clock, DataChunk, NodeConfig, NodeFsm, NodeState, RequestId, Settings,
};
use trellis_core::{ChunkEntry, ContentType, MethodStyle};
use trellis_net::{Publisher, Subscriber};
use trellis_record::{spawn_record_task, RecordQueue};

/// Commands a worker sends down a node's control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum NodeCommand {
    /// Connect subscribers to the already-filtered in-bound peers.
    #[serde(rename = "connect")]
    ConnectPeers { peers: Vec<(String, u16)> },
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "record")]
    Record,
    /// One manual step.
    #[serde(rename = "step")]
    Step,
    #[serde(rename = "stop")]
    Stop,
    /// Flush the record queue and finalize writers.
    #[serde(rename = "collect")]
    Collect,
    /// Advisory latest-value snapshot.
    #[serde(rename = "gather")]
    Gather,
    #[serde(rename = "method")]
    Method {
        name: String,
        #[serde(default)]
        params: serde_json::Map<String, serde_json::Value>,
        request: RequestId,
    },
    #[serde(rename = "shutdown")]
    Shutdown,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub config: NodeConfig,
    #[serde(default)]
    pub settings: Settings,
    /// Session staging directory the record writers append into.
    pub record_dir: PathBuf,
}

/// Default tick rate for source nodes that do not declare one.
const DEFAULT_RATE_HZ: f64 = 10.0;

enum Flow {
    Continue,
    Break,
}

enum Turn {
    Command(Option<NodeCommand>),
    Tick,
    Inputs(bool),
}

pub struct NodeRunner<C: Clock> {
    node: Box<dyn Node>,
    state: NodeState,
    config: NodeConfig,
    settings: Settings,
    record_dir: PathBuf,
    ctrl_rx: mpsc::UnboundedReceiver<NodeCommand>,
    link: Arc<dyn WorkerLink>,
    publisher: Option<Publisher>,
    subscriber: Option<Subscriber>,
    record_queue: Option<RecordQueue>,
    clock: C,
    step_failures: u32,
    latest_value: Option<serde_json::Value>,
}

impl<C: Clock + 'static> NodeRunner<C> {
    pub fn new(
        node: Box<dyn Node>,
        runner_config: RunnerConfig,
        ctrl_rx: mpsc::UnboundedReceiver<NodeCommand>,
        link: Arc<dyn WorkerLink>,
        clock: C,
    ) -> Self {
        let RunnerConfig { config, settings, record_dir } = runner_config;
        let state = NodeState::new(config.spec.id, config.spec.name.clone());
        Self {
            node,
            state,
            config,
            settings,
            record_dir,
            ctrl_rx,
            link,
            publisher: None,
            subscriber: None,
            record_queue: None,
            clock,
            step_failures: 0,
            latest_value: None,
        }
    }

    async fn report_status(&self) {
        self.link.report(LinkEvent::Status(self.state.clone())).await;
    }

    /// Drive the node until shutdown.
    pub async fn run(mut self) {
        if let Err(e) = self.node.setup().await {
            tracing::error!(node = %self.state.id, error = %e, "setup failed");
            self.link
                .report(LinkEvent::Failed {
                    node_id: self.state.id,
                    detail: format!("setup failed: {e}"),
                })
                .await;
            self.state.fsm = NodeFsm::Shutdown;
            self.report_status().await;
            return;
        }

        if !self.config.out_bound.is_empty() {
            match Publisher::bind(self.settings.pubsub.send_queue_depth).await {
                Ok(publisher) => {
                    self.state.port = publisher.port();
                    self.publisher = Some(publisher);
                }
                Err(e) => {
                    tracing::error!(node = %self.state.id, error = %e, "publisher bind failed");
                    self.link
                        .report(LinkEvent::Failed {
                            node_id: self.state.id,
                            detail: format!("publisher bind failed: {e}"),
                        })
                        .await;
                    self.state.fsm = NodeFsm::Shutdown;
                    self.report_status().await;
                    return;
                }
            }
        }

        self.record_queue =
            Some(spawn_record_task(self.record_dir.clone(), self.clock.clone()));
        self.state.registered_methods = self.node.method_specs();
        self.state.fsm = NodeFsm::Initialized;
        self.report_status().await;
        tracing::info!(node = %self.state.id, name = %self.state.name, "node initialized");

        let rate = self.config.spec.rate_hz.unwrap_or(DEFAULT_RATE_HZ).max(0.001);
        let mut tick = tokio::time::interval(Duration::from_secs_f64(1.0 / rate));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let is_source = self.config.in_bound.is_empty();

        loop {
            let running = self.state.fsm.is_running();
            let turn = {
                let ctrl_rx = &mut self.ctrl_rx;
                let subscriber = self.subscriber.as_ref();
                tokio::select! {
                    command = ctrl_rx.recv() => Turn::Command(command),
                    _ = tick.tick(), if running && is_source => Turn::Tick,
                    fresh = wait_fresh(subscriber), if running && !is_source => {
                        Turn::Inputs(fresh)
                    }
                }
            };
            match turn {
                Turn::Command(None) => break,
                Turn::Command(Some(command)) => {
                    if matches!(self.handle_command(command).await, Flow::Break) {
                        break;
                    }
                }
                Turn::Tick => self.step_once(None).await,
                Turn::Inputs(fresh) => {
                    if fresh {
                        if let Some(inputs) =
                            self.subscriber.as_ref().and_then(|s| s.take_fresh())
                        {
                            self.step_once(Some(inputs)).await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: NodeCommand) -> Flow {
        match command {
            NodeCommand::ConnectPeers { peers } => {
                if !peers.is_empty() {
                    match Subscriber::connect(peers).await {
                        Ok(subscriber) => self.subscriber = Some(subscriber),
                        Err(e) => {
                            tracing::error!(node = %self.state.id, error = %e, "peer connect failed");
                            self.link
                                .report(LinkEvent::Failed {
                                    node_id: self.state.id,
                                    detail: format!("peer connect failed: {e}"),
                                })
                                .await;
                            // Stay INITIALIZED; the commit will time out.
                            return Flow::Continue;
                        }
                    }
                }
                self.state.fsm = NodeFsm::Connected;
                self.report_status().await;
                self.state.fsm = NodeFsm::Ready;
                self.report_status().await;
            }
            NodeCommand::Start => {
                if self.state.fsm == NodeFsm::Ready {
                    self.state.fsm = NodeFsm::Previewing;
                    self.step_failures = 0;
                }
                self.report_status().await;
            }
            NodeCommand::Record => {
                if matches!(self.state.fsm, NodeFsm::Ready | NodeFsm::Previewing) {
                    self.state.fsm = NodeFsm::Recording;
                }
                self.report_status().await;
            }
            NodeCommand::Step => {
                if self.state.fsm.rank() >= NodeFsm::Ready.rank()
                    && !self.state.fsm.is_terminal()
                {
                    let inputs = self.subscriber.as_ref().map(|s| s.latest_all());
                    self.step_once(inputs).await;
                }
                self.report_status().await;
            }
            NodeCommand::Stop => {
                if self.state.fsm.is_running() {
                    self.state.fsm = NodeFsm::Stopped;
                }
                self.report_status().await;
            }
            NodeCommand::Collect => {
                let ranges = match &self.record_queue {
                    Some(queue) => queue.collect().await,
                    None => Default::default(),
                };
                self.link
                    .report(LinkEvent::Collected { node_id: self.state.id, ranges })
                    .await;
                if self.state.fsm.may_transition_to(NodeFsm::Saved)
                    && self.state.fsm != NodeFsm::Shutdown
                {
                    self.state.fsm = NodeFsm::Saved;
                }
                self.report_status().await;
            }
            NodeCommand::Gather => {
                self.link
                    .report(LinkEvent::Gather {
                        node_id: self.state.id,
                        fsm: self.state.fsm,
                        latest_value: self.latest_value.clone(),
                    })
                    .await;
            }
            NodeCommand::Method { name, params, request } => {
                self.handle_method(name, params, request).await;
            }
            NodeCommand::Shutdown => {
                self.node.teardown().await;
                self.state.fsm = NodeFsm::Shutdown;
                self.report_status().await;
                tracing::info!(node = %self.state.id, "node shut down");
                return Flow::Break;
            }
        }
        Flow::Continue
    }

    async fn handle_method(
        &mut self,
        name: String,
        params: serde_json::Map<String, serde_json::Value>,
        request: RequestId,
    ) {
        let node_id = self.state.id;
        let Some(spec) = self.state.registered_methods.get(&name).cloned() else {
            self.link
                .report(LinkEvent::Results {
                    node_id,
                    request,
                    success: false,
                    output: None,
                    error: Some(format!("unknown method: {name}")),
                })
                .await;
            return;
        };

        // Reset-style methods are only dispatchable from READY/PREVIEWING.
        if spec.style == MethodStyle::Reset
            && !matches!(self.state.fsm, NodeFsm::Ready | NodeFsm::Previewing)
        {
            self.link
                .report(LinkEvent::Results {
                    node_id,
                    request,
                    success: false,
                    output: None,
                    error: Some(format!(
                        "reset method {name} not allowed in {}",
                        self.state.fsm
                    )),
                })
                .await;
            return;
        }

        // All styles execute on the node loop, serialized against `step`
        // by construction; `blocking` and `reset` additionally mean no
        // step can interleave, which holds because the invocation is
        // awaited inline before the next loop turn.
        let result = self.node.invoke(&name, &params).await;
        let event = match result {
            Ok(output) => LinkEvent::Results {
                node_id,
                request,
                success: true,
                output: Some(output),
                error: None,
            },
            Err(e) => LinkEvent::Results {
                node_id,
                request,
                success: false,
                output: None,
                error: Some(e.to_string()),
            },
        };
        self.link.report(event).await;

        if spec.style == MethodStyle::Reset {
            self.state.fsm = NodeFsm::Ready;
            self.step_failures = 0;
            self.report_status().await;
        }
    }

    async fn step_once(&mut self, inputs: Option<StepInputs>) {
        match self.node.step(inputs).await {
            Ok(Some(output)) => {
                self.step_failures = 0;
                if !output.payload.is_empty() {
                    self.latest_value = Some(payload_summary(&output.payload));
                    if let Some(publisher) = &self.publisher {
                        let mut chunk = DataChunk::new(
                            self.state.id,
                            self.state.name.clone(),
                            self.clock.epoch_ms(),
                        );
                        chunk.payload = output.payload;
                        if let Err(e) = publisher.publish(&chunk) {
                            tracing::warn!(node = %self.state.id, error = %e, "publish failed");
                        }
                    }
                }
                if self.state.fsm.accepts_records() {
                    if let Some(queue) = &self.record_queue {
                        for entry in output.records {
                            queue.push(entry);
                        }
                    }
                }
            }
            Ok(None) => self.step_failures = 0,
            Err(e) => {
                self.step_failures += 1;
                tracing::warn!(
                    node = %self.state.id,
                    failures = self.step_failures,
                    error = %e,
                    "step failed"
                );
                // Three consecutive failures while recording demote the
                // node rather than poisoning the session.
                if self.state.fsm == NodeFsm::Recording && self.step_failures >= 3 {
                    self.state.fsm = NodeFsm::Stopped;
                    self.link
                        .report(LinkEvent::Failed {
                            node_id: self.state.id,
                            detail: format!("demoted after repeated step failures: {e}"),
                        })
                        .await;
                    self.report_status().await;
                }
            }
        }
    }
}

async fn wait_fresh(subscriber: Option<&Subscriber>) -> bool {
    match subscriber {
        Some(subscriber) => subscriber.recv(Duration::from_secs(3600)).await.is_ok(),
        None => std::future::pending().await,
    }
}

fn payload_summary(
    payload: &indexmap::IndexMap<String, ChunkEntry>,
) -> serde_json::Value {
    let mut summary = serde_json::Map::new();
    for (name, entry) in payload {
        let value = if entry.content_type == ContentType::Text {
            match std::str::from_utf8(&entry.value) {
                Ok(text) => serde_json::Value::String(text.to_string()),
                Err(_) => serde_json::json!({ "len": entry.value.len() }),
            }
        } else {
            serde_json::json!({
                "content_type": entry.content_type.to_string(),
                "len": entry.value.len(),
            })
        };
        summary.insert(name.clone(), value);
    }
    serde_json::Value::Object(summary)
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
