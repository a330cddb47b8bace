// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber side of the node data plane.
//!
//! Connects to a set of upstream publishers and keeps the most recent
//! chunk per upstream. `recv` hands out the newest unseen chunk;
//! `take_fresh` drains the per-upstream latest map for a step.

use futures_util::StreamExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use trellis_core::DataChunk;

use crate::codec::ChunkCodec;
use crate::NetError;

#[derive(Default, Debug)]
struct Latest {
    /// Upstream owner name → most recent chunk, freshness flag.
    chunks: IndexMap<String, (DataChunk, bool)>,
    /// Owner name of the most recent arrival.
    last_owner: Option<String>,
    /// Monotonic arrival counter.
    seq: u64,
}

#[derive(Debug)]
pub struct Subscriber {
    latest: Arc<Mutex<Latest>>,
    seq_rx: watch::Receiver<u64>,
    cancel: CancellationToken,
    peers: Vec<(String, u16)>,
}

impl Subscriber {
    /// Connect to every `(host, port)` publisher. Fails if any peer is
    /// unreachable — commit treats that as a peer-connect failure.
    pub async fn connect(peers: Vec<(String, u16)>) -> Result<Self, NetError> {
        let latest = Arc::new(Mutex::new(Latest::default()));
        let (seq_tx, seq_rx) = watch::channel(0u64);
        let seq_tx = Arc::new(seq_tx);
        let cancel = CancellationToken::new();

        for (host, port) in &peers {
            let stream = TcpStream::connect((host.as_str(), *port)).await.map_err(|e| {
                NetError::PeerUnreachable {
                    peer: format!("{host}:{port}"),
                    detail: e.to_string(),
                }
            })?;
            tokio::spawn(read_loop(
                stream,
                Arc::clone(&latest),
                Arc::clone(&seq_tx),
                cancel.clone(),
            ));
        }
        Ok(Self { latest, seq_rx, cancel, peers })
    }

    pub fn peers(&self) -> &[(String, u16)] {
        &self.peers
    }

    /// Wait for the next chunk to arrive (any upstream) and return it.
    /// Returns the most recent chunk if several arrived while waiting.
    pub async fn recv(&self, timeout: Duration) -> Result<DataChunk, NetError> {
        let mut seq_rx = self.seq_rx.clone();
        let seen = *seq_rx.borrow();
        let wait = tokio::time::timeout(timeout, async {
            loop {
                if *seq_rx.borrow() > seen {
                    return true;
                }
                if seq_rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;
        match wait {
            Ok(true) => {}
            Ok(false) => return Err(NetError::Ws("subscriber closed".into())),
            Err(_) => return Err(NetError::Timeout(timeout)),
        }
        let guard = self.latest.lock();
        guard
            .last_owner
            .as_ref()
            .and_then(|owner| guard.chunks.get(owner))
            .map(|(chunk, _)| chunk.clone())
            .ok_or(NetError::Timeout(timeout))
    }

    /// Latest chunk per upstream, marking everything seen. Returns `None`
    /// when nothing new arrived since the last call.
    pub fn take_fresh(&self) -> Option<IndexMap<String, DataChunk>> {
        let mut guard = self.latest.lock();
        let any_fresh = guard.chunks.values().any(|(_, fresh)| *fresh);
        if !any_fresh {
            return None;
        }
        let mut out = IndexMap::with_capacity(guard.chunks.len());
        for (name, (chunk, fresh)) in guard.chunks.iter_mut() {
            out.insert(name.clone(), chunk.clone());
            *fresh = false;
        }
        Some(out)
    }

    /// Latest chunk per upstream without consuming freshness.
    pub fn latest_all(&self) -> IndexMap<String, DataChunk> {
        let guard = self.latest.lock();
        guard.chunks.iter().map(|(k, (chunk, _))| (k.clone(), chunk.clone())).collect()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop(
    stream: TcpStream,
    latest: Arc<Mutex<Latest>>,
    seq_tx: Arc<watch::Sender<u64>>,
    cancel: CancellationToken,
) {
    let mut framed = FramedRead::new(stream, ChunkCodec::new());
    loop {
        tokio::select! {
            frame = framed.next() => {
                match frame {
                    Some(Ok(chunk)) => {
                        let seq = {
                            let mut guard = latest.lock();
                            guard.seq += 1;
                            guard.last_owner = Some(chunk.owner_name.clone());
                            guard
                                .chunks
                                .insert(chunk.owner_name.clone(), (chunk, true));
                            guard.seq
                        };
                        let _ = seq_tx.send(seq);
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "subscriber decode error");
                        return;
                    }
                    None => return,
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}

#[cfg(test)]
#[path = "subscriber_tests.rs"]
mod tests;
