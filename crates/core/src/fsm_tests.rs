// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn ranks_are_strictly_increasing() {
    let order = [
        NodeFsm::Null,
        NodeFsm::Initialized,
        NodeFsm::Connected,
        NodeFsm::Ready,
        NodeFsm::Previewing,
        NodeFsm::Recording,
        NodeFsm::Stopped,
        NodeFsm::Saved,
        NodeFsm::Shutdown,
    ];
    for pair in order.windows(2) {
        assert!(pair[0].rank() < pair[1].rank());
    }
}

#[test]
fn forward_transitions_are_legal() {
    assert!(NodeFsm::Null.may_transition_to(NodeFsm::Initialized));
    assert!(NodeFsm::Initialized.may_transition_to(NodeFsm::Connected));
    assert!(NodeFsm::Recording.may_transition_to(NodeFsm::Stopped));
    assert!(NodeFsm::Ready.may_transition_to(NodeFsm::Ready));
}

#[test]
fn backward_transitions_only_for_resets() {
    // Full reset lands on NULL from anywhere.
    assert!(NodeFsm::Recording.may_transition_to(NodeFsm::Null));
    // Registered-method reset lands on READY from anywhere.
    assert!(NodeFsm::Recording.may_transition_to(NodeFsm::Ready));
    assert!(NodeFsm::Shutdown.may_transition_to(NodeFsm::Ready));
    // Any other backward move is illegal.
    assert!(!NodeFsm::Recording.may_transition_to(NodeFsm::Previewing));
    assert!(!NodeFsm::Stopped.may_transition_to(NodeFsm::Connected));
}

#[test]
fn records_only_accepted_while_recording() {
    assert!(NodeFsm::Recording.accepts_records());
    assert!(!NodeFsm::Previewing.accepts_records());
    assert!(!NodeFsm::Stopped.accepts_records());
}

#[parameterized(
    null = { NodeFsm::Null, "\"NULL\"" },
    initialized = { NodeFsm::Initialized, "\"INITIALIZED\"" },
    connected = { NodeFsm::Connected, "\"CONNECTED\"" },
    ready = { NodeFsm::Ready, "\"READY\"" },
    previewing = { NodeFsm::Previewing, "\"PREVIEWING\"" },
    recording = { NodeFsm::Recording, "\"RECORDING\"" },
    stopped = { NodeFsm::Stopped, "\"STOPPED\"" },
    saved = { NodeFsm::Saved, "\"SAVED\"" },
    shutdown = { NodeFsm::Shutdown, "\"SHUTDOWN\"" },
)]
fn serializes_as_screaming_name(fsm: NodeFsm, expected: &str) {
    assert_eq!(serde_json::to_string(&fsm).unwrap(), expected);
    let back: NodeFsm = serde_json::from_str(expected).unwrap();
    assert_eq!(back, fsm);
}

#[test]
fn running_states() {
    assert!(NodeFsm::Previewing.is_running());
    assert!(NodeFsm::Recording.is_running());
    assert!(!NodeFsm::Ready.is_running());
    assert!(NodeFsm::Shutdown.is_terminal());
}
