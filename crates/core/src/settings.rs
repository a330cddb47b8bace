// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recognized configuration options.
//!
//! Settings load from TOML with every field defaulted, and are also
//! addressable by the dotted key names (`worker.timeout.node-creation`)
//! used in documentation and the CLI. Unknown keys are a `ConfigError`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub worker: WorkerSettings,
    pub manager: ManagerSettings,
    pub pubsub: PubsubSettings,
    pub ws: WsSettings,
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorkerSettings {
    pub timeout: WorkerTimeouts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerTimeouts {
    /// Max wait for an uploaded package to arrive complete.
    #[serde(rename = "package-delivery")]
    pub package_delivery_ms: u64,
    /// Max wait for a spawned node to reach INITIALIZED.
    #[serde(rename = "node-creation")]
    pub node_creation_ms: u64,
}

impl Default for WorkerTimeouts {
    fn default() -> Self {
        Self { package_delivery_ms: 10_000, node_creation_ms: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ManagerSettings {
    pub timeout: ManagerTimeouts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerTimeouts {
    /// Max wait for a full commit to reach READY.
    pub commit: u64,
    /// Max wait per lifecycle broadcast.
    pub lifecycle: u64,
}

impl Default for ManagerTimeouts {
    fn default() -> Self {
        Self { commit: 30_000, lifecycle: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubsubSettings {
    /// Publisher outbound queue depth before drop-oldest.
    #[serde(rename = "send-queue-depth")]
    pub send_queue_depth: usize,
}

impl Default for PubsubSettings {
    fn default() -> Self {
        Self { send_queue_depth: 32 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsSettings {
    /// Consecutive dropped frames before a slow UI client is disconnected.
    #[serde(rename = "max-backpressure-frames")]
    pub max_backpressure_frames: u32,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self { max_backpressure_frames: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    #[serde(rename = "base-ms")]
    pub base_ms: u64,
    #[serde(rename = "cap-ms")]
    pub cap_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self { base_ms: 250, cap_ms: 8_000 }
    }
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text)
            .map_err(|e| ConfigError { key: String::new(), detail: e.to_string() })
    }

    pub fn package_delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.worker.timeout.package_delivery_ms)
    }

    pub fn node_creation_timeout(&self) -> Duration {
        Duration::from_millis(self.worker.timeout.node_creation_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.manager.timeout.commit)
    }

    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_millis(self.manager.timeout.lifecycle)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect.base_ms)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect.cap_ms)
    }

    /// Read a setting by its dotted key name.
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        match key {
            "worker.timeout.package-delivery" => {
                Ok(self.worker.timeout.package_delivery_ms.to_string())
            }
            "worker.timeout.node-creation" => {
                Ok(self.worker.timeout.node_creation_ms.to_string())
            }
            "manager.timeout.commit" => Ok(self.manager.timeout.commit.to_string()),
            "manager.timeout.lifecycle" => Ok(self.manager.timeout.lifecycle.to_string()),
            "pubsub.send-queue-depth" => Ok(self.pubsub.send_queue_depth.to_string()),
            "ws.max-backpressure-frames" => Ok(self.ws.max_backpressure_frames.to_string()),
            "reconnect.base-ms" => Ok(self.reconnect.base_ms.to_string()),
            "reconnect.cap-ms" => Ok(self.reconnect.cap_ms.to_string()),
            _ => Err(unknown_key(key)),
        }
    }

    /// Write a setting by its dotted key name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "worker.timeout.package-delivery" => {
                self.worker.timeout.package_delivery_ms = parse(key, value)?;
            }
            "worker.timeout.node-creation" => {
                self.worker.timeout.node_creation_ms = parse(key, value)?;
            }
            "manager.timeout.commit" => self.manager.timeout.commit = parse(key, value)?,
            "manager.timeout.lifecycle" => self.manager.timeout.lifecycle = parse(key, value)?,
            "pubsub.send-queue-depth" => self.pubsub.send_queue_depth = parse(key, value)?,
            "ws.max-backpressure-frames" => {
                self.ws.max_backpressure_frames = parse(key, value)?;
            }
            "reconnect.base-ms" => self.reconnect.base_ms = parse(key, value)?,
            "reconnect.cap-ms" => self.reconnect.cap_ms = parse(key, value)?,
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }
}

fn unknown_key(key: &str) -> ConfigError {
    ConfigError { key: key.to_string(), detail: "unrecognized option".to_string() }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ConfigError { key: key.to_string(), detail: e.to_string() })
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
