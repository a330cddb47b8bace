// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-node lifecycle state machine.
//!
//! The FSM is monotonically non-decreasing: a node only ever moves forward
//! through the lifecycle, with two sanctioned exceptions — a full reset back
//! to `NULL`, and the registered-method `reset` style which lands on `READY`.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeFsm {
    #[default]
    Null,
    Initialized,
    Connected,
    Ready,
    Previewing,
    Recording,
    Stopped,
    Saved,
    Shutdown,
}

impl std::fmt::Display for NodeFsm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NodeFsm::Null => "NULL",
            NodeFsm::Initialized => "INITIALIZED",
            NodeFsm::Connected => "CONNECTED",
            NodeFsm::Ready => "READY",
            NodeFsm::Previewing => "PREVIEWING",
            NodeFsm::Recording => "RECORDING",
            NodeFsm::Stopped => "STOPPED",
            NodeFsm::Saved => "SAVED",
            NodeFsm::Shutdown => "SHUTDOWN",
        })
    }
}

impl NodeFsm {
    /// Position in the forward lifecycle order.
    pub fn rank(self) -> u8 {
        match self {
            NodeFsm::Null => 0,
            NodeFsm::Initialized => 1,
            NodeFsm::Connected => 2,
            NodeFsm::Ready => 3,
            NodeFsm::Previewing => 4,
            NodeFsm::Recording => 5,
            NodeFsm::Stopped => 6,
            NodeFsm::Saved => 7,
            NodeFsm::Shutdown => 8,
        }
    }

    /// Whether moving to `next` is a legal transition.
    ///
    /// Forward moves are always legal; the two backward moves allowed are
    /// the full reset (`* → NULL`) and the registered-method reset
    /// (`* → READY`).
    pub fn may_transition_to(self, next: NodeFsm) -> bool {
        next.rank() >= self.rank() || matches!(next, NodeFsm::Null | NodeFsm::Ready)
    }

    /// Record writes are only accepted in this state.
    pub fn accepts_records(self) -> bool {
        matches!(self, NodeFsm::Recording)
    }

    /// Whether the node is actively stepping.
    pub fn is_running(self) -> bool {
        matches!(self, NodeFsm::Previewing | NodeFsm::Recording)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeFsm::Shutdown)
    }
}

#[cfg(test)]
#[path = "fsm_tests.rs"]
mod tests;
