// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bus::EventBus;
use std::time::Duration;

#[derive(Clone, serde::Serialize)]
struct Counter {
    count: u32,
}

#[tokio::test]
async fn mutate_publishes_snapshot() {
    let bus = EventBus::new();
    let (_, mut rx) = bus.subscribe_sink(Some("state:changed")).await.unwrap();
    let state = Evented::new(Counter { count: 0 }, "Counter", bus);

    state.mutate(|c| c.count = 7);

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    match event {
        Event::StateChanged { class, snapshot } => {
            assert_eq!(class, "Counter");
            assert_eq!(snapshot["count"], 7);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn read_does_not_publish() {
    let bus = EventBus::new();
    let (_, mut rx) = bus.subscribe_sink(Some("state:changed")).await.unwrap();
    let state = Evented::new(Counter { count: 3 }, "Counter", bus);

    assert_eq!(state.read(|c| c.count), 3);
    assert_eq!(state.snapshot().count, 3);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn every_mutation_emits_one_event() {
    let bus = EventBus::new();
    let (_, mut rx) = bus.subscribe_sink(Some("state:changed")).await.unwrap();
    let state = Evented::new(Counter { count: 0 }, "Counter", bus);

    for _ in 0..3 {
        state.mutate(|c| c.count += 1);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut events = 0;
    while rx.try_recv().is_ok() {
        events += 1;
    }
    assert_eq!(events, 3);
}

#[tokio::test]
async fn clones_share_the_value() {
    let bus = EventBus::new();
    let state = Evented::new(Counter { count: 0 }, "Counter", bus);
    let other = state.clone();
    state.mutate(|c| c.count = 5);
    assert_eq!(other.read(|c| c.count), 5);
    assert_eq!(other.class(), "Counter");
}
