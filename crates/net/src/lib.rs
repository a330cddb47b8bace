// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! trellis-net: transport for the control and data planes.
//!
//! The control plane is HTTP plus a WebSocket multiplexer keyed by sender
//! id (server side) and a reconnecting WebSocket client. The data plane is
//! one TCP publisher per node fanning chunks out to peer subscribers.

pub mod client;
pub mod codec;
pub mod messages;
pub mod publisher;
pub mod server;
pub mod subscriber;

pub use client::{HttpClient, WsClient};
pub use codec::ChunkCodec;
pub use messages::{NodeMessage, UiMessage, WsControl};
pub use publisher::Publisher;
pub use server::{BoundServer, FileTransfer, HttpServer, ServerConfig};
pub use subscriber::Subscriber;

use thiserror::Error;

/// Transport-layer failures.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("bind failed: {0}")]
    Bind(std::io::Error),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("chunk: {0}")]
    Chunk(#[from] trellis_core::ChunkError),
    #[error("websocket: {0}")]
    Ws(String),
    #[error("http {url}: {detail}")]
    Http { url: String, detail: String },
    #[error("peer {peer} unreachable: {detail}")]
    PeerUnreachable { peer: String, detail: String },
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}
