// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logging bootstrap: env-filtered console output plus a daily-rolling
//! file under the daemon's state directory. Created once at startup; the
//! guard leaks so the writer lives for the process lifetime.

use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init(state_dir: &Path) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = std::fs::create_dir_all(state_dir);
    let appender = tracing_appender::rolling::daily(state_dir, "trellis.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    // Keep the background writer alive until exit.
    Box::leak(Box::new(guard));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init();
    if result.is_err() {
        // Already initialized (e.g. second daemon in one process); fine.
    }
}
