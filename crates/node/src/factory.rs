// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-side node factory registry.
//!
//! Node definitions travel as `NodeSpec{kind, params}` and are resolved
//! here against registered constructors — never as serialized code. User
//! packages register additional kinds at worker startup.

use crate::node::Node;
use crate::stock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use trellis_core::NodeSpec;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("unknown node kind: {0}")]
    UnknownKind(String),
    #[error("bad params for {kind}: {detail}")]
    BadParams { kind: String, detail: String },
}

type BuildFn = Arc<dyn Fn(&NodeSpec) -> Result<Box<dyn Node>, FactoryError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct NodeRegistry {
    builders: HashMap<String, BuildFn>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the stock kinds.
    pub fn with_stock() -> Self {
        let mut registry = Self::new();
        registry.register("counter", |spec| Ok(Box::new(stock::CounterSource::from_spec(spec)?)));
        registry.register("relay", |_| Ok(Box::new(stock::Relay::default())));
        registry.register("collector", |spec| Ok(Box::new(stock::Collector::from_spec(spec)?)));
        registry
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        build: impl Fn(&NodeSpec) -> Result<Box<dyn Node>, FactoryError> + Send + Sync + 'static,
    ) {
        self.builders.insert(kind.into(), Arc::new(build));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.builders.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn build(&self, spec: &NodeSpec) -> Result<Box<dyn Node>, FactoryError> {
        let build = self
            .builders
            .get(&spec.kind)
            .ok_or_else(|| FactoryError::UnknownKind(spec.kind.clone()))?;
        build(spec)
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
