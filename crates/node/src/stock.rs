// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stock node kinds: a ticking counter source, a passthrough relay, and a
//! recording collector sink. Enough to wire demo graphs and exercise the
//! runtime end to end.

use crate::factory::FactoryError;
use crate::node::{Node, NodeError, StepInputs, StepOutput};
use async_trait::async_trait;
use std::collections::BTreeMap;
use trellis_core::{MethodStyle, NodeSpec, RegisteredMethod};

fn param_i64(spec: &NodeSpec, key: &str) -> Option<i64> {
    spec.params.get(key).and_then(|v| v.as_i64())
}

/// Source that counts up from a configured start, publishing the value as
/// text. Exposes the three registered-method styles.
pub struct CounterSource {
    name: String,
    start: i64,
    value: i64,
}

impl CounterSource {
    pub fn from_spec(spec: &NodeSpec) -> Result<Self, FactoryError> {
        let start = param_i64(spec, "start").unwrap_or(0);
        Ok(Self { name: spec.name.clone(), start, value: start })
    }
}

#[async_trait]
impl Node for CounterSource {
    async fn setup(&mut self) -> Result<(), NodeError> {
        self.value = self.start;
        Ok(())
    }

    async fn step(&mut self, _inputs: Option<StepInputs>) -> Result<Option<StepOutput>, NodeError> {
        self.value += 1;
        let output = StepOutput::new()
            .with_text("value", &self.value.to_string())
            .save_json(&self.name, serde_json::json!({ "value": self.value }));
        Ok(Some(output))
    }

    async fn teardown(&mut self) {}

    fn method_specs(&self) -> BTreeMap<String, RegisteredMethod> {
        let mut methods = BTreeMap::new();
        methods.insert(
            "printout".to_string(),
            RegisteredMethod { params: BTreeMap::new(), style: MethodStyle::Concurrent },
        );
        methods.insert(
            "set_value".to_string(),
            RegisteredMethod {
                params: [("value".to_string(), "int | float".to_string())].into_iter().collect(),
                style: MethodStyle::Blocking,
            },
        );
        methods.insert(
            "reset".to_string(),
            RegisteredMethod { params: BTreeMap::new(), style: MethodStyle::Reset },
        );
        methods
    }

    async fn invoke(
        &mut self,
        method: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, NodeError> {
        match method {
            "printout" => Ok(serde_json::json!(self.value)),
            "set_value" => {
                let value = params
                    .get("value")
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| NodeError::BadParams("value must be numeric".into()))?;
                self.value = value;
                Ok(serde_json::json!(value))
            }
            "reset" => {
                self.value = self.start;
                Ok(serde_json::json!(self.start))
            }
            other => Err(NodeError::UnknownMethod(other.to_string())),
        }
    }
}

/// Re-publishes the payload of its first fresh upstream chunk.
#[derive(Default)]
pub struct Relay;

#[async_trait]
impl Node for Relay {
    async fn setup(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    async fn step(&mut self, inputs: Option<StepInputs>) -> Result<Option<StepOutput>, NodeError> {
        let Some(inputs) = inputs else {
            return Ok(None);
        };
        let Some((_, chunk)) = inputs.into_iter().next() else {
            return Ok(None);
        };
        let mut output = StepOutput::new();
        output.payload = chunk.payload;
        Ok(Some(output))
    }

    async fn teardown(&mut self) {}
}

/// Sink that remembers the latest value per upstream and records every
/// arrival as a JSON line while recording.
pub struct Collector {
    name: String,
    pub seen: u64,
}

impl Collector {
    pub fn from_spec(spec: &NodeSpec) -> Result<Self, FactoryError> {
        Ok(Self { name: spec.name.clone(), seen: 0 })
    }
}

#[async_trait]
impl Node for Collector {
    async fn setup(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    async fn step(&mut self, inputs: Option<StepInputs>) -> Result<Option<StepOutput>, NodeError> {
        let Some(inputs) = inputs else {
            return Ok(None);
        };
        let mut output = StepOutput::new();
        for (upstream, chunk) in &inputs {
            self.seen += 1;
            let value = chunk.text("value").map(str::to_string).ok();
            output = output.save_json(
                &self.name,
                serde_json::json!({
                    "upstream": upstream,
                    "timestamp_ms": chunk.timestamp_ms,
                    "value": value,
                }),
            );
        }
        Ok(Some(output))
    }

    async fn teardown(&mut self) {}
}

#[cfg(test)]
#[path = "stock_tests.rs"]
mod tests;
