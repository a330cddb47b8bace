// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The pipeline graph and the worker→nodes mapping.
//!
//! Vertices carry a `NodeSpec` — a factory identifier plus a typed config
//! blob — instead of serialized user code; workers resolve the identifier
//! against their node registry. Edges are labelled by the producer's output
//! name and the consumer's input binding.

use crate::{NodeId, WorkerId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Declarative description of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub name: String,
    /// Factory identifier registered on the worker (e.g. `"counter"`).
    pub kind: String,
    /// Opaque config blob handed to the factory.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Tick rate for source nodes (no in-edges). Consumers ignore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_hz: Option<f64>,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            kind: kind.into(),
            params: serde_json::Value::Null,
            rate_hz: None,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_rate(mut self, rate_hz: f64) -> Self {
        self.rate_hz = Some(rate_hz);
        self
    }
}

/// A directed edge: `from`'s output feeds `to`'s input binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    /// Producer's output name.
    pub output: String,
    pub to: NodeId,
    /// Consumer's input binding.
    pub input: String,
}

/// Errors from graph construction and validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate node: {0}")]
    DuplicateNode(NodeId),
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    #[error("self edge on node: {0}")]
    SelfEdge(NodeId),
    #[error("graph contains a cycle through node: {0}")]
    Cycle(NodeId),
}

/// A directed acyclic graph of node specs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    nodes: IndexMap<NodeId, NodeSpec>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> Result<(), GraphError> {
        if self.nodes.contains_key(&spec.id) {
            return Err(GraphError::DuplicateNode(spec.id));
        }
        self.nodes.insert(spec.id, spec);
        Ok(())
    }

    /// Add an edge between existing nodes. Rejects self-edges and edges that
    /// would close a cycle.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        output: impl Into<String>,
        to: NodeId,
        input: impl Into<String>,
    ) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&from) {
            return Err(GraphError::UnknownNode(from));
        }
        if !self.nodes.contains_key(&to) {
            return Err(GraphError::UnknownNode(to));
        }
        if from == to {
            return Err(GraphError::SelfEdge(from));
        }
        self.edges.push(Edge { from, output: output.into(), to, input: input.into() });
        if let Err(e) = self.check_acyclic() {
            self.edges.pop();
            return Err(e);
        }
        Ok(())
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn specs(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.values()
    }

    pub fn spec(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn in_edges(&self, id: &NodeId) -> impl Iterator<Item = &Edge> {
        let id = *id;
        self.edges.iter().filter(move |e| e.to == id)
    }

    pub fn out_edges(&self, id: &NodeId) -> impl Iterator<Item = &Edge> {
        let id = *id;
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// True for nodes with no in-edges (tick-driven producers).
    pub fn is_source(&self, id: &NodeId) -> bool {
        self.in_edges(id).next().is_none()
    }

    /// Kahn's algorithm; returns the first node left un-emitted on a cycle.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut indegree: HashMap<NodeId, usize> =
            self.nodes.keys().map(|id| (*id, 0)).collect();
        for e in &self.edges {
            if let Some(d) = indegree.get_mut(&e.to) {
                *d += 1;
            }
        }
        let mut queue: Vec<NodeId> =
            indegree.iter().filter(|(_, d)| **d == 0).map(|(id, _)| *id).collect();
        let mut emitted = HashSet::new();
        while let Some(id) = queue.pop() {
            emitted.insert(id);
            for e in self.edges.iter().filter(|e| e.from == id) {
                if let Some(d) = indegree.get_mut(&e.to) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push(e.to);
                    }
                }
            }
        }
        match self.nodes.keys().find(|id| !emitted.contains(*id)) {
            Some(id) => Err(GraphError::Cycle(*id)),
            None => Ok(()),
        }
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        for e in &self.edges {
            if !self.nodes.contains_key(&e.from) {
                return Err(GraphError::UnknownNode(e.from));
            }
            if !self.nodes.contains_key(&e.to) {
                return Err(GraphError::UnknownNode(e.to));
            }
        }
        self.check_acyclic()
    }
}

/// What a worker needs to host one node: the spec plus the node's edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub spec: NodeSpec,
    /// Upstream producers this node subscribes to.
    #[serde(default)]
    pub in_bound: Vec<NodeId>,
    /// Downstream consumers (presence decides whether a publisher is bound).
    #[serde(default)]
    pub out_bound: Vec<NodeId>,
}

impl Graph {
    /// Deployment config for one vertex.
    pub fn config_for(&self, id: &NodeId) -> Option<NodeConfig> {
        let spec = self.spec(id)?.clone();
        let in_bound = self.in_edges(id).map(|e| e.from).collect();
        let out_bound = self.out_edges(id).map(|e| e.to).collect();
        Some(NodeConfig { spec, in_bound, out_bound })
    }
}

/// Worker id → the node ids it will host.
pub type Mapping = BTreeMap<WorkerId, BTreeSet<NodeId>>;

/// Check that a mapping covers every graph vertex exactly once and names
/// only known vertices. Returns a human-readable reason on failure.
pub fn validate_mapping(graph: &Graph, mapping: &Mapping) -> Result<(), String> {
    let mut seen: BTreeSet<NodeId> = BTreeSet::new();
    for (worker_id, node_ids) in mapping {
        for node_id in node_ids {
            if graph.spec(node_id).is_none() {
                return Err(format!("mapping names unknown node {node_id} on {worker_id}"));
            }
            if !seen.insert(*node_id) {
                return Err(format!("node {node_id} assigned to more than one worker"));
            }
        }
    }
    for id in graph.node_ids() {
        if !seen.contains(id) {
            return Err(format!("node {id} not assigned to any worker"));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
