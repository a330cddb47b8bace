// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wall-clock stamping for the data and record planes.
//!
//! Two things in the pipeline carry a timestamp: every published chunk
//! is stamped with the moment its `step` produced it, and every record
//! stream keeps the epoch of its first and last append for the session
//! metadata. Both go through this trait so tests can drive a recording
//! with a hand-advanced clock instead of sleeping through real time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of chunk and record timestamps.
pub trait Clock: Clone + Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn epoch_ms(&self) -> u64;
}

/// The wall clock.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to. Clones share the same time, so
/// a test can hold one handle while the record task stamps with another.
#[derive(Clone, Default)]
pub struct ManualClock {
    epoch_ms: Arc<AtomicU64>,
}

impl ManualClock {
    /// A manual clock starting at the given epoch.
    pub fn at(epoch_ms: u64) -> Self {
        Self { epoch_ms: Arc::new(AtomicU64::new(epoch_ms)) }
    }

    pub fn advance(&self, by: Duration) {
        self.epoch_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn jump_to(&self, epoch_ms: u64) {
        self.epoch_ms.store(epoch_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn epoch_ms(&self) -> u64 {
        self.epoch_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "time_tests.rs"]
mod tests;
