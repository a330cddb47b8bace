// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observable shared state.
//!
//! `Evented<T>` makes mutation explicit: every `mutate` closure runs
//! against the value and then publishes a `state:changed {class,
//! snapshot}` event carrying a fresh JSON snapshot, which is how UI
//! clients receive live `ManagerState`. There are no field-write hooks.

use crate::bus::EventBus;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use trellis_core::Event;

pub struct Evented<T> {
    inner: Arc<Mutex<T>>,
    bus: EventBus,
    class: &'static str,
}

impl<T> Clone for Evented<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), bus: self.bus.clone(), class: self.class }
    }
}

impl<T: Clone + Serialize> Evented<T> {
    pub fn new(value: T, class: &'static str, bus: EventBus) -> Self {
        Self { inner: Arc::new(Mutex::new(value)), bus, class }
    }

    /// Read through a closure; never publishes.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Owned snapshot of the current value.
    pub fn snapshot(&self) -> T {
        self.inner.lock().clone()
    }

    /// Mutate through a closure, then publish the changed snapshot.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let (result, snapshot) = {
            let mut guard = self.inner.lock();
            let result = f(&mut guard);
            (result, serde_json::to_value(&*guard).unwrap_or(serde_json::Value::Null))
        };
        self.bus.publish(Event::StateChanged { class: self.class.to_string(), snapshot });
        result
    }

    pub fn class(&self) -> &'static str {
        self.class
    }
}

#[cfg(test)]
#[path = "evented_tests.rs"]
mod tests;
