// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-instance lock for the manager's log directory.

use fs2::FileExt;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Exclusive lock on `logdir/manager.lock`; released on drop.
pub struct InstanceLock {
    // NOTE(lifetime): held to maintain the exclusive file lock
    #[allow(dead_code)]
    file: File,
}

impl InstanceLock {
    pub fn acquire(dir: &Path) -> std::io::Result<Self> {
        let mut file = File::create(dir.join("manager.lock"))?;
        file.try_lock_exclusive()?;
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { file })
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
