// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::NetError;

/// A closable bounded channel.
///
/// Closing never drops the transport out from under a blocked peer: it
/// flips the closed flag and fires the internal cancellation token, which
/// unblocks every pending `blocking_get`/`blocking_put` with
/// [`NetError::ClosedChan`].
pub struct SafeChannel<T> {
    closed: AtomicBool,
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    cancel: CancellationToken,
    capacity: usize,
}

impl<T: Send> SafeChannel<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            closed: AtomicBool::new(false),
            tx,
            rx: Mutex::new(rx),
            cancel: CancellationToken::new(),
            capacity: capacity.max(1),
        }
    }

    /// Non-blocking insert; a full queue returns [`NetError::FullChan`].
    pub fn put(&self, value: T) -> Result<(), NetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::ClosedChan);
        }
        match self.tx.try_send(value) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(NetError::FullChan),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NetError::ClosedChan),
        }
    }

    /// Blocking insert, interruptible by `ctx` or channel close.
    pub async fn blocking_put(
        &self,
        ctx: Option<&CancellationToken>,
        value: T,
    ) -> Result<(), NetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::ClosedChan);
        }
        let ctx_cancelled = async {
            match ctx {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            res = self.tx.send(value) => res.map_err(|_| NetError::ClosedChan),
            _ = ctx_cancelled => Err(NetError::ChanContextDone),
            _ = self.cancel.cancelled() => Err(NetError::ClosedChan),
        }
    }

    /// Non-blocking take; an empty queue returns [`NetError::EmptyChan`].
    pub async fn get(&self) -> Result<T, NetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::ClosedChan);
        }
        self.direct_get().await
    }

    /// Take the queue head regardless of the closed flag; drains leftovers
    /// after close.
    pub async fn direct_get(&self) -> Result<T, NetError> {
        let mut rx = self.rx.lock().await;
        match rx.try_recv() {
            Ok(value) => Ok(value),
            Err(mpsc::error::TryRecvError::Empty) => Err(NetError::EmptyChan),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                warn!("safe channel inner chan is closed");
                Err(NetError::ClosedChan)
            },
        }
    }

    /// Blocking take, interruptible by `ctx` or channel close.
    pub async fn blocking_get(
        &self,
        ctx: Option<&CancellationToken>,
    ) -> Result<T, NetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::ClosedChan);
        }
        let mut rx = self.rx.lock().await;
        let ctx_cancelled = async {
            match ctx {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            value = rx.recv() => value.ok_or(NetError::ClosedChan),
            _ = ctx_cancelled => Err(NetError::ChanContextDone),
            _ = self.cancel.cancelled() => Err(NetError::ClosedChan),
        }
    }

    /// Consume values until `handler` returns `false` or the channel
    /// closes. Handlers that want to survive their own failures must catch
    /// them internally.
    pub async fn listen<F>(&self, mut handler: F) -> Result<(), NetError>
    where F: FnMut(T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::ClosedChan);
        }
        loop {
            let value = self.blocking_get(None).await?;
            if !handler(value) {
                return Ok(());
            }
        }
    }

    /// Idempotent close; wakes all blocked peers.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.cancel.cancel();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
