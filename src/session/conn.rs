// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{any::Any, net::SocketAddr, sync::Arc};

use bytes::Bytes;

use crate::errors::{NetError, SharedError};

/// Completion callback of an asynchronous write.
pub type WriteCallback = Box<dyn FnOnce(Result<(), SharedError>) + Send + 'static>;

/// Uniform connection surface over OS sockets or WebSocket streams.
///
/// Synchronous `write`/`writev` only stage bytes into the outbound buffer
/// (bounded by the write-buffer capacity) and are meant to be called from
/// event-loop callbacks; `flush` asks the loop to drain. The asynchronous
/// variants are safe from any task and queue through the loop's write
/// channel.
pub trait Conn: Send + Sync {
    /// Stable identity derived from the peer (server side) or local
    /// (client side) address. Log/trace identifier only.
    fn hash(&self) -> u64;

    fn local_addr(&self) -> SocketAddr;
    fn peer_addr(&self) -> SocketAddr;

    /// Closed flag plus the reason recorded by the first closer.
    fn is_closed(&self) -> (bool, Option<SharedError>);

    /// Monotone false→true transition; returns `true` only for the first
    /// caller, which also gets to attach the reason.
    fn to_closed(&self, reason: Option<SharedError>) -> bool;

    /// Owner back-reference (the session envelope), set once at open and
    /// cleared at close.
    fn context(&self) -> Option<Arc<dyn Any + Send + Sync>>;
    fn set_context(&self, context: Option<Arc<dyn Any + Send + Sync>>);

    // buffered inspection
    fn inbound_buffered(&self) -> usize;
    fn outbound_buffered(&self) -> usize;

    /// Copy out the next `n` inbound bytes without consuming them.
    fn peek(&self, n: usize) -> Result<Bytes, NetError>;
    /// Copy out and consume the next `n` inbound bytes; `n = 0` takes all.
    fn next(&self, n: usize) -> Result<Bytes, NetError>;
    fn discard(&self, n: usize) -> Result<usize, NetError>;
    /// Consume up to `buf.len()` inbound bytes into `buf`.
    fn read(&self, buf: &mut [u8]) -> Result<usize, NetError>;

    // outbound
    fn write(&self, buf: &[u8]) -> Result<usize, NetError>;
    fn writev(&self, bufs: &[&[u8]]) -> Result<usize, NetError>;
    fn flush(&self) -> Result<(), NetError>;

    // asynchronous writes, goroutine-safe
    fn async_write(
        &self,
        buf: Bytes,
        callback: Option<WriteCallback>,
    ) -> Result<(), NetError>;
    fn async_writev(
        &self,
        bufs: Vec<Bytes>,
        callback: Option<WriteCallback>,
    ) -> Result<(), NetError>;

    /// Submit an orderly shutdown to the event loop.
    fn close(&self) -> Result<(), NetError>;
}
