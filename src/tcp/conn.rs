// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{
    TcpStream,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};

use crate::{
    codec::FrameReader,
    errors::{NetError, SharedError},
    session::conn::{Conn, WriteCallback},
    tcp::{eventloop::LoopHandle, options::SocketOptions},
    utils::address_hash,
};

/// Elastic inbound byte buffer with peek/discard access for the streaming
/// decoders.
pub(crate) struct ElasticBuffer {
    buf: BytesMut,
}

impl ElasticBuffer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4 * 1024) }
    }

    pub(crate) fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub(crate) fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn reset(&mut self) {
        self.buf.clear();
    }
}

impl FrameReader for ElasticBuffer {
    fn peek(&self, n: usize) -> Option<&[u8]> {
        if n > self.buf.len() {
            return None;
        }
        Some(&self.buf[..n])
    }

    fn discard(&mut self, n: usize) -> Result<usize, NetError> {
        if n > self.buf.len() {
            return Err(NetError::other("discard out of range"));
        }
        let _ = self.buf.split_to(n);
        Ok(n)
    }

    fn inbound_buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Bounded outbound staging buffer.
struct WriteBuffer {
    buf: BytesMut,
    cap: usize,
}

impl WriteBuffer {
    fn new(cap: usize) -> Self {
        Self { buf: BytesMut::with_capacity(1024), cap }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, NetError> {
        if self.buf.len() > self.cap {
            return Err(NetError::OutOfWriteCap);
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    fn reset(&mut self) {
        self.buf.clear();
    }
}

/// State of one TCP connection, shared between the event loop, its reader
/// task and the owning session.
pub struct TcpConn {
    hash: u64,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    closed: AtomicBool,
    close_reason: OnceCell<Option<SharedError>>,
    inbound: Mutex<ElasticBuffer>,
    outbound: Mutex<WriteBuffer>,
    loop_handle: OnceCell<LoopHandle>,
    context: Mutex<Option<std::sync::Arc<dyn std::any::Any + Send + Sync>>>,
}

impl TcpConn {
    /// Wrap a freshly connected/accepted stream, applying socket options.
    ///
    /// The identity hash folds the local address on the client side and
    /// the peer address on the server side.
    pub(crate) fn init(
        stream: TcpStream,
        socket_opts: &SocketOptions,
        write_buffer_cap: usize,
        from_client: bool,
    ) -> Result<(std::sync::Arc<Self>, OwnedReadHalf, OwnedWriteHalf), NetError> {
        stream.set_nodelay(socket_opts.tcp_no_delay)?;
        {
            let sock = SockRef::from(&stream);
            if socket_opts.tcp_keep_alive_secs > 0 {
                let keepalive = TcpKeepalive::new()
                    .with_time(Duration::from_secs(socket_opts.tcp_keep_alive_secs));
                sock.set_tcp_keepalive(&keepalive)?;
            }
            if socket_opts.socket_recv_buffer > 0 {
                sock.set_recv_buffer_size(socket_opts.socket_recv_buffer)?;
            }
            if socket_opts.socket_send_buffer > 0 {
                sock.set_send_buffer_size(socket_opts.socket_send_buffer)?;
            }
        }
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let identity = if from_client { local_addr } else { peer_addr };
        let (read_half, write_half) = stream.into_split();
        let conn = std::sync::Arc::new(Self {
            hash: address_hash(&identity.to_string()),
            local_addr,
            peer_addr,
            closed: AtomicBool::new(false),
            close_reason: OnceCell::new(),
            inbound: Mutex::new(ElasticBuffer::new()),
            outbound: Mutex::new(WriteBuffer::new(write_buffer_cap)),
            loop_handle: OnceCell::new(),
            context: Mutex::new(None),
        });
        Ok((conn, read_half, write_half))
    }

    pub(crate) fn attach_loop(&self, handle: LoopHandle) {
        let _ = self.loop_handle.set(handle);
    }

    pub(crate) fn loop_handle(&self) -> Option<&LoopHandle> {
        self.loop_handle.get()
    }

    pub(crate) fn inbound_lock(&self) -> MutexGuard<'_, ElasticBuffer> {
        self.inbound.lock()
    }

    pub(crate) fn take_outbound(&self) -> Bytes {
        self.outbound.lock().take()
    }

    pub(crate) fn reset_buffers(&self) {
        self.inbound.lock().reset();
        self.outbound.lock().reset();
    }
}

impl Conn for TcpConn {
    fn hash(&self) -> u64 {
        self.hash
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn is_closed(&self) -> (bool, Option<SharedError>) {
        let closed = self.closed.load(Ordering::Acquire);
        let reason = self.close_reason.get().cloned().flatten();
        (closed, reason)
    }

    fn to_closed(&self, reason: Option<SharedError>) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.close_reason.set(reason);
            true
        } else {
            false
        }
    }

    fn context(&self) -> Option<std::sync::Arc<dyn std::any::Any + Send + Sync>> {
        self.context.lock().clone()
    }

    fn set_context(
        &self,
        context: Option<std::sync::Arc<dyn std::any::Any + Send + Sync>>,
    ) {
        *self.context.lock() = context;
    }

    fn inbound_buffered(&self) -> usize {
        self.inbound.lock().buffered()
    }

    fn outbound_buffered(&self) -> usize {
        self.outbound.lock().len()
    }

    fn peek(&self, n: usize) -> Result<Bytes, NetError> {
        let inbound = self.inbound.lock();
        let n = if n == 0 { inbound.buffered() } else { n };
        match inbound.peek(n) {
            Some(buf) => Ok(Bytes::copy_from_slice(buf)),
            None => Err(NetError::other("short inbound buffer")),
        }
    }

    fn next(&self, n: usize) -> Result<Bytes, NetError> {
        let mut inbound = self.inbound.lock();
        let n = if n == 0 { inbound.buffered() } else { n };
        let buf = match inbound.peek(n) {
            Some(buf) => Bytes::copy_from_slice(buf),
            None => return Err(NetError::other("short inbound buffer")),
        };
        inbound.discard(n)?;
        Ok(buf)
    }

    fn discard(&self, n: usize) -> Result<usize, NetError> {
        let mut inbound = self.inbound.lock();
        let n = if n == 0 { inbound.buffered() } else { n };
        if n > inbound.buffered() {
            return Err(NetError::other("short inbound buffer"));
        }
        inbound.discard(n)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, NetError> {
        let mut inbound = self.inbound.lock();
        let n = buf.len().min(inbound.buffered());
        if n == 0 {
            return Ok(0);
        }
        if let Some(data) = inbound.peek(n) {
            buf[..n].copy_from_slice(data);
        }
        inbound.discard(n)?;
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, NetError> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.outbound.lock().write(buf)
    }

    fn writev(&self, bufs: &[&[u8]]) -> Result<usize, NetError> {
        let mut outbound = self.outbound.lock();
        let mut written = 0;
        for buf in bufs {
            written += outbound.write(buf)?;
        }
        Ok(written)
    }

    fn flush(&self) -> Result<(), NetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::ClosedConn);
        }
        if let Some(handle) = self.loop_handle.get() {
            handle.submit_flush();
        }
        Ok(())
    }

    fn async_write(
        &self,
        buf: Bytes,
        callback: Option<WriteCallback>,
    ) -> Result<(), NetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::ClosedConn);
        }
        match self.loop_handle.get() {
            Some(handle) => handle.async_write(buf, callback),
            None => Err(NetError::ClosedConn),
        }
    }

    fn async_writev(
        &self,
        bufs: Vec<Bytes>,
        callback: Option<WriteCallback>,
    ) -> Result<(), NetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::ClosedConn);
        }
        match self.loop_handle.get() {
            Some(handle) => handle.async_writev(bufs, callback),
            None => Err(NetError::ClosedConn),
        }
    }

    fn close(&self) -> Result<(), NetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::ClosedConn);
        }
        match self.loop_handle.get() {
            Some(handle) => {
                handle.submit_close(None);
                Ok(())
            },
            None => {
                // no loop was ever attached, flip the flag directly
                self.to_closed(None);
                Ok(())
            },
        }
    }
}
