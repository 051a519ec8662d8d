// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Weak};

use bytes::Bytes;
use once_cell::sync::OnceCell;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::{Mutex, mpsc},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{
    errors::{NetError, SharedError},
    session::conn::{Conn, WriteCallback},
    tcp::conn::TcpConn,
};

pub(crate) const LOOP_BUFFER_SIZE: usize = 512;

/// Outcome a handler callback asks of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    None,
    Close,
}

/// Per-connection callbacks driven by the event loop.
pub(crate) trait LoopHandler: Send + Sync + 'static {
    fn on_open(&self) -> Action;

    /// Invoked after inbound bytes were appended; runs decode + dispatch.
    fn on_traffic(&self) -> Result<Action, NetError>;

    /// Invoked exactly once per connection, after the owner transitioned
    /// to closed.
    fn on_close(&self, reason: Option<SharedError>);

    /// CAS the owner (client or connection) into the closed state.
    fn owner_to_closed(&self, reason: Option<SharedError>) -> bool;

    fn is_owner_closed(&self) -> bool;
}

pub(crate) struct WriteEvent {
    pub buf: Option<Bytes>,
    pub bufs: Option<Vec<Bytes>>,
    pub callback: Option<WriteCallback>,
}

/// Submission surface of a running loop; cheap to clone, stored on the
/// connection so async writes and closes can reach the loop from any task.
#[derive(Clone)]
pub(crate) struct LoopHandle {
    write_tx: mpsc::Sender<WriteEvent>,
    close_tx: mpsc::Sender<Option<SharedError>>,
    pub(crate) cancel: CancellationToken,
}

impl LoopHandle {
    pub(crate) fn async_write(
        &self,
        buf: Bytes,
        callback: Option<WriteCallback>,
    ) -> Result<(), NetError> {
        self.submit(WriteEvent { buf: Some(buf), bufs: None, callback })
    }

    pub(crate) fn async_writev(
        &self,
        bufs: Vec<Bytes>,
        callback: Option<WriteCallback>,
    ) -> Result<(), NetError> {
        self.submit(WriteEvent { buf: None, bufs: Some(bufs), callback })
    }

    fn submit(&self, event: WriteEvent) -> Result<(), NetError> {
        match self.write_tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(NetError::WriteQueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NetError::ClosedConn),
        }
    }

    /// Ask the loop to drain the outbound buffer; dropped silently when the
    /// write queue is busy, the pending writes will drain it anyway.
    pub(crate) fn submit_flush(&self) {
        let _ = self.write_tx.try_send(WriteEvent {
            buf: None,
            bufs: None,
            callback: None,
        });
    }

    /// Non-blocking close notification; a full queue means a close is
    /// already in flight.
    pub(crate) fn submit_close(&self, reason: Option<SharedError>) {
        let _ = self.close_tx.try_send(reason);
    }
}

/// The per-connection cooperative scheduler.
///
/// Two tasks per connection: the reader blocks on the socket and hands
/// filled buffers over `read_chan`, waiting on `read_done` before the next
/// read so at most one decode is outstanding; the loop task multiplexes
/// reads, queued writes and shutdown. Both respawn on handler panics while
/// the owner is still open.
pub(crate) struct EventLoop {
    conn: Arc<TcpConn>,
    handler: Arc<dyn LoopHandler>,
    read_buffer_cap: usize,

    read_rx: Mutex<mpsc::Receiver<Bytes>>,
    read_tx: mpsc::Sender<Bytes>,
    read_done_rx: Mutex<mpsc::Receiver<()>>,
    read_done_tx: mpsc::Sender<()>,
    write_rx: Mutex<mpsc::Receiver<WriteEvent>>,
    close_rx: Mutex<mpsc::Receiver<Option<SharedError>>>,
    read_half: Mutex<Option<OwnedReadHalf>>,
    write_half: Mutex<Option<OwnedWriteHalf>>,
    handle: LoopHandle,
    self_ref: OnceCell<Weak<EventLoop>>,
}

impl EventLoop {
    pub(crate) fn start(
        conn: Arc<TcpConn>,
        read_half: OwnedReadHalf,
        write_half: OwnedWriteHalf,
        handler: Arc<dyn LoopHandler>,
        read_buffer_cap: usize,
        write_queue_cap: usize,
    ) -> Arc<Self> {
        let (read_tx, read_rx) = mpsc::channel(1);
        let (read_done_tx, read_done_rx) = mpsc::channel(1);
        let (write_tx, write_rx) = mpsc::channel(write_queue_cap.max(1));
        let (close_tx, close_rx) = mpsc::channel(4);
        let handle = LoopHandle {
            write_tx,
            close_tx,
            cancel: CancellationToken::new(),
        };
        conn.attach_loop(handle.clone());
        let event_loop = Arc::new(Self {
            conn,
            handler,
            read_buffer_cap,
            read_rx: Mutex::new(read_rx),
            read_tx,
            read_done_rx: Mutex::new(read_done_rx),
            read_done_tx,
            write_rx: Mutex::new(write_rx),
            close_rx: Mutex::new(close_rx),
            read_half: Mutex::new(Some(read_half)),
            write_half: Mutex::new(Some(write_half)),
            handle,
            self_ref: OnceCell::new(),
        });
        let _ = event_loop.self_ref.set(Arc::downgrade(&event_loop));
        event_loop.spawn_run(true);
        event_loop.spawn_reader();
        event_loop
    }

    fn self_arc(&self) -> Option<Arc<Self>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    /// Orderly shutdown request; the actual close happens on the loop task.
    pub(crate) async fn stop(&self, reason: Option<SharedError>) -> Result<(), NetError> {
        if self.handler.is_owner_closed() {
            return Err(NetError::ClosedClient);
        }
        tokio::select! {
            res = self.handle.close_tx.send(reason) => {
                res.map_err(|_| NetError::ClosedClient)
            },
            _ = self.handle.cancel.cancelled() => Ok(()),
        }
    }

    fn spawn_run(&self, first: bool) {
        let Some(this) = self.self_arc() else { return };
        tokio::spawn(async move {
            let task = tokio::spawn(Arc::clone(&this).run(first));
            if let Err(err) = task.await
                && err.is_panic()
            {
                error!(conn = this.conn.hash(), "event loop run panicked");
                if !this.handler.is_owner_closed() {
                    this.spawn_run(false);
                }
            }
        });
    }

    fn spawn_reader(&self) {
        let Some(this) = self.self_arc() else { return };
        tokio::spawn(async move {
            let task = tokio::spawn(Arc::clone(&this).read_conn());
            if let Err(err) = task.await
                && err.is_panic()
            {
                error!(conn = this.conn.hash(), "connection reader panicked");
                if !this.handler.is_owner_closed() {
                    this.spawn_reader();
                }
            }
        });
    }

    async fn run(self: Arc<Self>, first: bool) {
        if first {
            if self.handler.on_open() == Action::Close {
                self._stop(None).await;
                return;
            }
            // bytes preloaded before the loop started (handshake tail)
            if self.conn.inbound_buffered() > 0 {
                match self.handler.on_traffic() {
                    Ok(Action::None) => {},
                    Ok(Action::Close) => {
                        self._stop(None).await;
                        return;
                    },
                    Err(reason) => {
                        self._stop(Some(Arc::new(reason))).await;
                        return;
                    },
                }
            }
        }
        let mut read_rx = self.read_rx.lock().await;
        let mut write_rx = self.write_rx.lock().await;
        let mut close_rx = self.close_rx.lock().await;
        loop {
            tokio::select! {
                data = read_rx.recv() => {
                    let Some(data) = data else { return };
                    match self.handle_read(data) {
                        Ok(Action::None) => {
                            let _ = self.read_done_tx.try_send(());
                        },
                        Ok(Action::Close) => {
                            self._stop(None).await;
                            return;
                        },
                        Err(reason) => {
                            self._stop(Some(reason)).await;
                            return;
                        },
                    }
                },
                event = write_rx.recv() => {
                    let Some(event) = event else { return };
                    if let Err(reason) = self.handle_write(event).await {
                        self._stop(Some(reason)).await;
                        return;
                    }
                },
                reason = close_rx.recv() => {
                    let Some(reason) = reason else { return };
                    self._stop(reason).await;
                    return;
                },
                _ = self.handle.cancel.cancelled() => {
                    warn!(conn = self.conn.hash(), "cancel event loop running");
                    return;
                },
            }
        }
    }

    fn handle_read(&self, data: Bytes) -> Result<Action, SharedError> {
        {
            let mut inbound = self.conn.inbound_lock();
            if inbound.buffered() > self.read_buffer_cap {
                return Err(Arc::new(NetError::OutOfReadCap));
            }
            inbound.write(&data);
        }
        self.handler.on_traffic().map_err(Arc::new)
    }

    async fn handle_write(&self, event: WriteEvent) -> Result<(), SharedError> {
        let WriteEvent { buf, bufs, callback } = event;
        if let Some(buf) = buf
            && let Err(err) = self.conn.write(&buf)
        {
            return Err(Arc::new(err));
        }
        if let Some(bufs) = bufs {
            for buf in &bufs {
                if let Err(err) = self.conn.write(buf) {
                    return Err(Arc::new(err));
                }
            }
        }
        let mut write_result: Result<(), SharedError> = Ok(());
        if self.conn.outbound_buffered() > 0 {
            let data = self.conn.take_outbound();
            let mut write_half = self.write_half.lock().await;
            match write_half.as_mut() {
                Some(half) => {
                    if let Err(err) = half.write_all(&data).await {
                        write_result = Err(Arc::new(NetError::Io(err)));
                    }
                },
                None => write_result = Err(Arc::new(NetError::ClosedConn)),
            }
        }
        match callback {
            Some(callback) => {
                // the submitter decides what a failed write means
                callback(write_result);
                Ok(())
            },
            None => write_result,
        }
    }

    async fn _stop(&self, reason: Option<SharedError>) {
        if !self.handler.owner_to_closed(reason.clone()) {
            return;
        }
        {
            let mut write_half = self.write_half.lock().await;
            if let Some(mut half) = write_half.take()
                && let Err(err) = half.shutdown().await
            {
                error!(error = %err, "close connection error");
            }
        }
        self.handler.on_close(reason);
        self.handle.cancel.cancel();
        {
            let mut read_half = self.read_half.lock().await;
            let _ = read_half.take();
        }
        self.conn.reset_buffers();
        self.conn.set_context(None);
    }

    async fn read_conn(self: Arc<Self>) {
        let mut scratch = vec![0u8; LOOP_BUFFER_SIZE];
        loop {
            if self.handler.is_owner_closed() {
                return;
            }
            let read = {
                let mut read_half = self.read_half.lock().await;
                let Some(half) = read_half.as_mut() else { return };
                tokio::select! {
                    _ = self.handle.cancel.cancelled() => return,
                    res = half.read(&mut scratch) => res,
                }
            };
            match read {
                Ok(0) => {
                    // peer closed
                    if let Err(err) = self.stop(None).await
                        && !matches!(err, NetError::ClosedClient)
                    {
                        error!(error = %err, "stop on eof error");
                    }
                    return;
                },
                Ok(n) => {
                    let data = Bytes::copy_from_slice(&scratch[..n]);
                    tokio::select! {
                        _ = self.handle.cancel.cancelled() => return,
                        res = self.read_tx.send(data) => {
                            if res.is_err() {
                                return;
                            }
                        },
                    }
                    let mut read_done = self.read_done_rx.lock().await;
                    tokio::select! {
                        _ = self.handle.cancel.cancelled() => return,
                        _ = read_done.recv() => {},
                    }
                },
                Err(err) => {
                    let reason = Arc::new(NetError::Io(err));
                    if let Err(err) = self.stop(Some(reason)).await
                        && !matches!(err, NetError::ClosedClient)
                    {
                        error!(error = %err, "stop on read error");
                    }
                    return;
                },
            }
        }
    }
}
