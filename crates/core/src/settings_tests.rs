// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;
use yare::parameterized;

#[test]
fn defaults_are_sane() {
    let settings = Settings::default();
    assert_eq!(settings.node_creation_timeout(), Duration::from_secs(10));
    assert_eq!(settings.commit_timeout(), Duration::from_secs(30));
    assert_eq!(settings.pubsub.send_queue_depth, 32);
    assert!(settings.reconnect_base() < settings.reconnect_cap());
}

#[test]
fn toml_overrides_selected_fields() {
    let settings = Settings::from_toml(
        r#"
        [worker.timeout]
        node-creation = 2500

        [pubsub]
        send-queue-depth = 4
        "#,
    )
    .unwrap();
    assert_eq!(settings.worker.timeout.node_creation_ms, 2500);
    assert_eq!(settings.pubsub.send_queue_depth, 4);
    // Untouched sections keep defaults.
    assert_eq!(settings.manager.timeout.lifecycle, 10_000);
}

#[test]
fn bad_toml_is_a_config_error() {
    assert!(Settings::from_toml("worker = 3").is_err());
}

#[parameterized(
    package_delivery = { "worker.timeout.package-delivery" },
    node_creation = { "worker.timeout.node-creation" },
    commit = { "manager.timeout.commit" },
    lifecycle = { "manager.timeout.lifecycle" },
    queue_depth = { "pubsub.send-queue-depth" },
    backpressure = { "ws.max-backpressure-frames" },
    base = { "reconnect.base-ms" },
    cap = { "reconnect.cap-ms" },
)]
fn every_documented_key_gets_and_sets(key: &str) {
    let mut settings = Settings::default();
    settings.set(key, "1234").unwrap();
    assert_eq!(settings.get(key).unwrap(), "1234");
}

#[test]
fn unknown_keys_rejected() {
    let mut settings = Settings::default();
    assert!(settings.get("worker.timeout.nap").is_err());
    assert!(settings.set("nope", "1").is_err());
}

#[test]
fn non_numeric_values_rejected() {
    let mut settings = Settings::default();
    let err = settings.set("reconnect.base-ms", "soon").unwrap_err();
    assert_eq!(err.key, "reconnect.base-ms");
}
