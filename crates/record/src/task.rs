// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-node record task: single consumer of the record queue.
//!
//! Entries fan out to one lazily-opened writer per stream name. Writer
//! errors are logged and counted, never propagated — recording must not
//! halt the node. `collect` closes every writer and reports the stream
//! ranges for the session metadata.

use crate::entry::RecordEntry;
use crate::session::RecordRange;
use crate::writer::{open_writer, RecordWriter};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use trellis_core::Clock;

enum RecordMsg {
    Entry(RecordEntry),
    Collect(oneshot::Sender<BTreeMap<String, RecordRange>>),
}

/// Producer handle to a node's record queue.
#[derive(Clone)]
pub struct RecordQueue {
    tx: mpsc::UnboundedSender<RecordMsg>,
}

impl RecordQueue {
    /// Enqueue one entry. Returns false after the task has stopped.
    pub fn push(&self, entry: RecordEntry) -> bool {
        self.tx.send(RecordMsg::Entry(entry)).is_ok()
    }

    /// Flush and close every writer, returning the recorded ranges.
    pub async fn collect(&self) -> BTreeMap<String, RecordRange> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(RecordMsg::Collect(reply_tx)).is_err() {
            return BTreeMap::new();
        }
        reply_rx.await.unwrap_or_default()
    }
}

struct OpenStream {
    writer: Box<dyn RecordWriter>,
    range: RecordRange,
    errors: u64,
}

/// Spawn the consumer task writing into `dir`.
pub fn spawn_record_task<C: Clock + 'static>(dir: PathBuf, clock: C) -> RecordQueue {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(dir, clock, rx));
    RecordQueue { tx }
}

async fn run<C: Clock>(dir: PathBuf, clock: C, mut rx: mpsc::UnboundedReceiver<RecordMsg>) {
    let mut streams: BTreeMap<String, OpenStream> = BTreeMap::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            RecordMsg::Entry(entry) => {
                let now = clock.epoch_ms();
                let stream = match streams.get_mut(&entry.name) {
                    Some(stream) => stream,
                    None => match open_writer(&dir, &entry.name, &entry.data) {
                        Ok(writer) => {
                            tracing::debug!(name = %entry.name, dtype = entry.data.dtype(), "stream opened");
                            streams.entry(entry.name.clone()).or_insert(OpenStream {
                                writer,
                                range: RecordRange {
                                    dtype: entry.data.dtype().to_string(),
                                    start_time: now,
                                    end_time: now,
                                },
                                errors: 0,
                            })
                        }
                        Err(e) => {
                            tracing::warn!(name = %entry.name, error = %e, "writer open failed");
                            continue;
                        }
                    },
                };
                if let Err(e) = stream.writer.append(&entry) {
                    stream.errors += 1;
                    tracing::warn!(
                        name = %entry.name,
                        errors = stream.errors,
                        error = %e,
                        "record append failed"
                    );
                } else {
                    stream.range.end_time = now;
                }
            }
            RecordMsg::Collect(reply) => {
                let mut ranges = BTreeMap::new();
                for (name, mut stream) in std::mem::take(&mut streams) {
                    if let Err(e) = stream.writer.close() {
                        tracing::warn!(name = %name, error = %e, "writer close failed");
                        continue;
                    }
                    ranges.insert(name, stream.range);
                }
                let _ = reply.send(ranges);
            }
        }
    }

    // Queue dropped without a collect: close what's open.
    for (name, mut stream) in streams {
        if let Err(e) = stream.writer.close() {
            tracing::warn!(name = %name, error = %e, "writer close failed");
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
