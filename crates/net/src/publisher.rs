// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Publisher side of the node data plane.
//!
//! One TCP listener per node on an OS-chosen port. Chunks are serialized
//! once and fanned out through a broadcast queue of configured depth; a
//! subscriber connection that falls behind skips ahead to the newest
//! retained chunk, so delivery is lossy and latest-wins by construction.

use bytes::Bytes;
use futures_util::SinkExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use trellis_core::DataChunk;

use crate::codec::ChunkCodec;
use crate::NetError;

pub struct Publisher {
    addr: SocketAddr,
    frames: broadcast::Sender<Bytes>,
    subscribers: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl Publisher {
    /// Bind on an OS-chosen port and start accepting subscribers.
    pub async fn bind(queue_depth: usize) -> Result<Self, NetError> {
        let listener =
            TcpListener::bind(("0.0.0.0", 0)).await.map_err(NetError::Bind)?;
        let addr = listener.local_addr()?;
        let (frames, _) = broadcast::channel(queue_depth.max(1));
        let subscribers = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            frames.clone(),
            Arc::clone(&subscribers),
            cancel.clone(),
        ));
        tracing::debug!(%addr, "publisher bound");
        Ok(Self { addr, frames, subscribers, cancel })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }

    /// Non-blocking publish. With no subscribers connected the chunk is
    /// simply dropped.
    pub fn publish(&self, chunk: &DataChunk) -> Result<(), NetError> {
        let bytes = chunk.encode()?;
        // send only fails with zero receivers, which is not an error here.
        let _ = self.frames.send(bytes);
        Ok(())
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    frames: broadcast::Sender<Bytes>,
    subscribers: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "subscriber connected");
                        subscribers.fetch_add(1, Ordering::Relaxed);
                        let rx = frames.subscribe();
                        let counter = Arc::clone(&subscribers);
                        let conn_cancel = cancel.clone();
                        tokio::spawn(async move {
                            serve_subscriber(stream, rx, conn_cancel).await;
                            counter.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "publisher accept failed");
                    }
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    mut rx: broadcast::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    let mut framed = FramedWrite::new(stream, ChunkCodec::new());
    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Ok(bytes) => {
                        if framed.send(bytes).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Queue overflowed: older chunks were dropped in
                        // favor of the newest ones.
                        tracing::trace!(skipped, "subscriber lagged, dropped frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}
