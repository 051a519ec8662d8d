// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{errors::NetError, worker::fixed::FixedWorkerPool};

type TaskCallback = Arc<dyn Fn() + Send + Sync>;

/// A scheduled entry of the wheel.
///
/// `round` counts the remaining full revolutions before the task fires;
/// `stop` marks removed tasks for lazy collection.
pub struct TimerTask {
    id: u64,
    delay: Duration,
    callback: TaskCallback,
    circle: bool,
    async_mode: bool,
    round: AtomicI64,
    stop: AtomicBool,
}

impl TimerTask {
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct WheelState {
    buckets: Vec<HashMap<u64, Arc<TimerTask>>>,
    bucket_indexes: HashMap<u64, usize>,
    current_index: usize,
}

enum TickAction {
    Collect,
    Wait,
    Fire,
}

struct WheelInner {
    tick: Duration,
    buckets_num: usize,
    state: Mutex<WheelState>,
    id_gen: AtomicU64,
    pool: Option<Arc<FixedWorkerPool>>,
    started: AtomicBool,
    exited: AtomicBool,
    cancel: CancellationToken,
}

/// Single-level hashed time wheel.
///
/// A task with delay `d` lands in bucket
/// `(current + d/tick) % buckets_num` with `round = d/tick/buckets_num`;
/// every tick advances the index and fires the due entries of the visited
/// bucket. Async tasks dispatch to the worker pool (or a fresh task);
/// synchronous ones run inline on the tick task and must not block long.
#[derive(Clone)]
pub struct TimeWheel {
    inner: Arc<WheelInner>,
}

impl TimeWheel {
    pub fn new(tick: Duration, buckets_num: usize) -> Result<Self, NetError> {
        if tick < Duration::from_millis(1) {
            return Err(NetError::InvalidParams);
        }
        if buckets_num == 0 {
            return Err(NetError::InvalidParams);
        }
        let buckets = (0..buckets_num).map(|_| HashMap::new()).collect();
        Ok(Self {
            inner: Arc::new(WheelInner {
                tick,
                buckets_num,
                state: Mutex::new(WheelState {
                    buckets,
                    bucket_indexes: HashMap::new(),
                    current_index: 0,
                }),
                id_gen: AtomicU64::new(0),
                pool: None,
                started: AtomicBool::new(false),
                exited: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        })
    }

    /// Route async task dispatch through `pool` instead of fresh tasks.
    pub fn with_pool(mut self, pool: Arc<FixedWorkerPool>) -> Result<Self, NetError> {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => {
                inner.pool = Some(pool);
                Ok(self)
            },
            None => Err(NetError::InvalidParams),
        }
    }

    /// Launch the tick task; only the first call does anything.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let wheel = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(wheel.inner.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first interval tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = wheel.inner.cancel.cancelled() => return,
                    _ = ticker.tick() => wheel.handle_tick(),
                }
            }
        });
    }

    /// Idempotent stop.
    pub fn stop(&self) {
        if self.inner.exited.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();
    }

    /// One-shot task, dispatched asynchronously.
    pub fn add(&self, delay: Duration, callback: TaskCallback) -> Arc<TimerTask> {
        self.add_any(delay, callback, false, true)
    }

    /// Periodic task, dispatched asynchronously on every interval.
    pub fn add_cron(&self, delay: Duration, callback: TaskCallback) -> Arc<TimerTask> {
        self.add_any(delay, callback, true, true)
    }

    /// One-shot completion signal without a callback.
    pub fn after(&self, delay: Duration) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.add_any(
            delay,
            Arc::new(move || {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            }),
            false,
            false,
        );
        rx
    }

    /// Safe whether or not the task has already fired.
    pub fn remove(&self, task: &Arc<TimerTask>) {
        task.stop.store(true, Ordering::Release);
        let mut state = self.inner.state.lock();
        if let Some(index) = state.bucket_indexes.remove(&task.id) {
            state.buckets[index].remove(&task.id);
        }
    }

    fn add_any(
        &self,
        delay: Duration,
        callback: TaskCallback,
        circle: bool,
        async_mode: bool,
    ) -> Arc<TimerTask> {
        let delay = if delay.is_zero() { self.inner.tick } else { delay };
        let task = Arc::new(TimerTask {
            id: self.inner.id_gen.fetch_add(1, Ordering::Relaxed) + 1,
            delay,
            callback,
            circle,
            async_mode,
            round: AtomicI64::new(0),
            stop: AtomicBool::new(false),
        });
        let mut state = self.inner.state.lock();
        self.store(&mut state, Arc::clone(&task), false);
        task
    }

    fn store(&self, state: &mut WheelState, task: Arc<TimerTask>, circle_mode: bool) {
        let round = self.calculate_round(task.delay);
        let index = self.calculate_index(state.current_index, task.delay);
        // circular re-insertions already waited the current tick out
        let round = if round > 0 && circle_mode { round - 1 } else { round };
        task.round.store(round, Ordering::Release);
        state.bucket_indexes.insert(task.id, index);
        state.buckets[index].insert(task.id, task);
    }

    fn calculate_round(&self, delay: Duration) -> i64 {
        let delay_secs = delay.as_secs_f64();
        let tick_secs = self.inner.tick.as_secs_f64();
        (delay_secs / tick_secs / self.inner.buckets_num as f64) as i64
    }

    fn calculate_index(&self, current_index: usize, delay: Duration) -> usize {
        let delay_secs = delay.as_secs_f64();
        let tick_secs = self.inner.tick.as_secs_f64();
        (current_index + (delay_secs / tick_secs) as usize) % self.inner.buckets_num
    }

    fn handle_tick(&self) {
        let mut due = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let current = state.current_index;
            let ids: Vec<u64> = state.buckets[current].keys().copied().collect();
            for id in ids {
                let action = {
                    let Some(task) = state.buckets[current].get(&id) else {
                        continue;
                    };
                    if task.stop.load(Ordering::Acquire) {
                        TickAction::Collect
                    } else if task.round.load(Ordering::Acquire) > 0 {
                        task.round.fetch_sub(1, Ordering::AcqRel);
                        TickAction::Wait
                    } else {
                        TickAction::Fire
                    }
                };
                match action {
                    TickAction::Collect => {
                        state.buckets[current].remove(&id);
                        state.bucket_indexes.remove(&id);
                    },
                    TickAction::Wait => {},
                    TickAction::Fire => {
                        if let Some(task) = state.buckets[current].remove(&id) {
                            state.bucket_indexes.remove(&id);
                            if task.circle {
                                self.store(&mut state, Arc::clone(&task), true);
                            }
                            due.push(task);
                        }
                    },
                }
            }
            state.current_index = (current + 1) % self.inner.buckets_num;
        }
        // dispatch outside the wheel lock
        for task in due {
            let callback = Arc::clone(&task.callback);
            if task.async_mode {
                match &self.inner.pool {
                    Some(pool) => {
                        if let Err(err) =
                            pool.try_submit(task.id, Box::new(move |_| callback()))
                        {
                            error!(error = %err, "submit time wheel task error");
                        }
                    },
                    None => {
                        tokio::spawn(async move { callback() });
                    },
                }
            } else {
                callback();
            }
        }
    }
}
