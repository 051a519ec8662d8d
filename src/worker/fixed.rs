// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{
    errors::NetError,
    worker::{WorkerJob, WorkerLocal},
};

struct WorkerState {
    receiver: mpsc::Receiver<WorkerJob>,
    local: WorkerLocal,
}

/// Fixed-slot worker pool with deterministic routing.
///
/// `submit(group, job)` always lands on slot `group % slot_num`, so jobs
/// sharing a group key are serialized on one worker. Each slot owns a
/// bounded queue of `queue_size`; in blocking mode submits wait for room,
/// otherwise a full queue refuses the job. Workers respawn on panics
/// while the pool is open.
pub struct FixedWorkerPool {
    senders: Vec<mpsc::Sender<WorkerJob>>,
    states: Vec<Arc<Mutex<WorkerState>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
    active_workers: AtomicUsize,
    slot_num: usize,
    queue_size: usize,
    blocking_on_full: bool,
    self_ref: OnceCell<Weak<Self>>,
}

impl FixedWorkerPool {
    pub fn new(
        slot_num: usize,
        queue_size: usize,
        blocking_on_full: bool,
    ) -> Result<Arc<Self>, NetError> {
        if slot_num == 0 || queue_size == 0 {
            return Err(NetError::InvalidParams);
        }
        let mut senders = Vec::with_capacity(slot_num);
        let mut states = Vec::with_capacity(slot_num);
        for _ in 0..slot_num {
            let (tx, rx) = mpsc::channel(queue_size);
            senders.push(tx);
            states.push(Arc::new(Mutex::new(WorkerState {
                receiver: rx,
                local: WorkerLocal::default(),
            })));
        }
        let pool = Arc::new(Self {
            senders,
            states,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            active_workers: AtomicUsize::new(slot_num),
            slot_num,
            queue_size,
            blocking_on_full,
            self_ref: OnceCell::new(),
        });
        let _ = pool.self_ref.set(Arc::downgrade(&pool));
        for index in 0..slot_num {
            pool.spawn_worker(index);
        }
        Ok(pool)
    }

    /// Pool sized for I/O-heavy tasks: `(1 + round(io_event_time_ratio))`
    /// workers per available core.
    pub fn new_io(
        io_event_time_ratio: f64,
        io_event_queue_size: usize,
        blocking_on_full: bool,
    ) -> Result<Arc<Self>, NetError> {
        let cores = std::thread::available_parallelism().map_or(1, usize::from);
        let slot_num = (1 + io_event_time_ratio.round() as usize) * cores;
        Self::new(slot_num, io_event_queue_size, blocking_on_full)
    }

    pub fn slot_num(&self) -> usize {
        self.slot_num
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn slot_for(&self, group: u64) -> usize {
        if self.slot_num > 1 { (group % self.slot_num as u64) as usize } else { 0 }
    }

    /// Submit honoring the pool's blocking mode.
    pub async fn submit(&self, group: u64, job: WorkerJob) -> Result<(), NetError> {
        if self.is_closed() {
            return Err(NetError::WorkerPoolClosed);
        }
        let sender = &self.senders[self.slot_for(group)];
        if self.blocking_on_full {
            tokio::select! {
                res = sender.send(job) => res.map_err(|_| NetError::WorkerPoolClosed),
                _ = self.cancel.cancelled() => Err(NetError::WorkerPoolClosed),
            }
        } else {
            Self::try_send(sender, job)
        }
    }

    /// Non-blocking submit regardless of the pool mode.
    pub fn try_submit(&self, group: u64, job: WorkerJob) -> Result<(), NetError> {
        if self.is_closed() {
            return Err(NetError::WorkerPoolClosed);
        }
        Self::try_send(&self.senders[self.slot_for(group)], job)
    }

    fn try_send(sender: &mpsc::Sender<WorkerJob>, job: WorkerJob) -> Result<(), NetError> {
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(NetError::WorkerPoolQueueIsFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NetError::WorkerPoolClosed),
        }
    }

    /// Fan the same job out to every slot; full queues are skipped in
    /// non-blocking mode.
    pub async fn submit_to_all(
        &self,
        job: Arc<dyn Fn(&mut WorkerLocal) + Send + Sync>,
        blocking_on_full: bool,
    ) -> Result<(), NetError> {
        if self.is_closed() {
            return Err(NetError::WorkerPoolClosed);
        }
        for sender in &self.senders {
            let job = Arc::clone(&job);
            let boxed: WorkerJob = Box::new(move |local| job(local));
            if blocking_on_full {
                tokio::select! {
                    res = sender.send(boxed) => {
                        if res.is_err() {
                            return Err(NetError::WorkerPoolClosed);
                        }
                    },
                    _ = self.cancel.cancelled() => return Err(NetError::WorkerPoolClosed),
                }
            } else if let Err(err) = Self::try_send(sender, boxed)
                && matches!(err, NetError::WorkerPoolClosed)
            {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Close the pool and wait for the workers to drain, bounded by
    /// `timeout`; a deadline hit logs and returns anyway.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), NetError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(NetError::WorkerPoolClosed);
        }
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.active_workers.load(Ordering::Acquire) == 0 {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        warn!("abort fixed worker pool shutdown by deadline");
        Ok(())
    }

    fn spawn_worker(&self, index: usize) {
        let Some(pool) = self.self_ref.get().and_then(Weak::upgrade) else {
            return;
        };
        tokio::spawn(async move {
            let task = tokio::spawn(Arc::clone(&pool).worker_run(index));
            match task.await {
                Err(err) if err.is_panic() => {
                    error!(slot = index, "fixed pool worker panicked");
                    if pool.is_closed() {
                        pool.active_workers.fetch_sub(1, Ordering::AcqRel);
                    } else {
                        pool.spawn_worker(index);
                    }
                },
                _ => {
                    pool.active_workers.fetch_sub(1, Ordering::AcqRel);
                },
            }
        });
    }

    async fn worker_run(self: Arc<Self>, index: usize) {
        let state = Arc::clone(&self.states[index]);
        let mut guard = state.lock().await;
        let WorkerState { receiver, local } = &mut *guard;
        loop {
            tokio::select! {
                job = receiver.recv() => match job {
                    Some(job) => job(local),
                    None => return,
                },
                _ = self.cancel.cancelled() => return,
            }
        }
    }
}
