// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Weak,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::error;

use crate::{
    cache::store::{DeleteOutcome, LeaseStore, PutOutcome},
    errors::NetError,
    timewheel::{TimeWheel, TimerTask},
};

/// 8 signature bytes plus the sentinel space.
pub const SIGNATURE_LEN: usize = 9;

/// Invoked after every renewal attempt with the attempt result and the
/// current retry count.
pub type KeepaliveCallback = Arc<dyn Fn(Option<&NetError>, u32) + Send + Sync>;

fn build_signature(signature: [u8; 8]) -> String {
    let mut out = String::with_capacity(SIGNATURE_LEN);
    for byte in signature {
        out.push(char::from(byte));
    }
    out.push(' ');
    out
}

/// Strip a detected signature prefix, recognised by the sentinel space in
/// ninth position.
fn strip_signature(value: &str) -> &str {
    let mut chars = value.char_indices();
    for _ in 0..SIGNATURE_LEN - 1 {
        if chars.next().is_none() {
            return value;
        }
    }
    match chars.next() {
        Some((index, ' ')) => &value[index + 1..],
        _ => value,
    }
}

/// Keyed lease cache over a shared store.
///
/// Values are stored as `signature ‖ payload`; only the signature holder
/// may refresh or delete an entry. Renewal runs on the second-granularity
/// time wheel.
pub struct Cache {
    store: Arc<dyn LeaseStore>,
    sec_timer: TimeWheel,
    self_ref: OnceCell<Weak<Cache>>,
}

impl Cache {
    pub fn new(store: Arc<dyn LeaseStore>, sec_timer: TimeWheel) -> Arc<Self> {
        let cache = Arc::new(Self { store, sec_timer, self_ref: OnceCell::new() });
        let _ = cache.self_ref.set(Arc::downgrade(&cache));
        cache
    }

    /// Insert or refresh a signed entry.
    ///
    /// With `keepalive_sec > 0` a renewal task re-runs the operation every
    /// interval; failures retry `keepalive_retry` times spaced by
    /// `retry_delay_sec` before falling back to the normal cadence.
    /// A key held under a foreign signature fails with
    /// [`NetError::CacheExist`].
    #[allow(clippy::too_many_arguments)]
    pub async fn add_or_update(
        &self,
        key: &str,
        value: &str,
        signature: [u8; 8],
        expire_sec: i64,
        keepalive_sec: i64,
        keepalive_retry: u32,
        retry_delay_sec: i64,
        callback: Option<KeepaliveCallback>,
    ) -> Result<Option<Arc<KeepaliveTask>>, NetError> {
        if key.is_empty() || expire_sec <= 0 {
            return Err(NetError::InvalidParams);
        }
        if keepalive_sec > 0 && callback.is_none() {
            return Err(NetError::other("callback cant be nil"));
        }
        if keepalive_retry > 0 && retry_delay_sec <= 0 {
            return Err(NetError::other("retry delay should be greater than 0"));
        }
        let sign_str = build_signature(signature);
        let signed_value = format!("{sign_str}{value}");
        self.insert_or_update(key, &signed_value, &sign_str, expire_sec)
            .await?;
        if keepalive_sec > 0 {
            let Some(callback) = callback else {
                return Err(NetError::other("callback cant be nil"));
            };
            let Some(cache) = self.self_ref.get().and_then(Weak::upgrade) else {
                return Err(NetError::NilValue);
            };
            let task = KeepaliveTask::create(
                cache,
                key.to_string(),
                signed_value,
                sign_str,
                expire_sec,
                Duration::from_secs(keepalive_sec as u64),
                keepalive_retry,
                Duration::from_secs(retry_delay_sec.max(0) as u64),
                callback,
            );
            task.start();
            return Ok(Some(task));
        }
        Ok(None)
    }

    pub(crate) async fn insert_or_update(
        &self,
        key: &str,
        value: &str,
        signature: &str,
        expire_sec: i64,
    ) -> Result<(), NetError> {
        match self
            .store
            .put_keep_signature(key, value, signature, expire_sec * 1000)
            .await?
        {
            PutOutcome::Inserted | PutOutcome::Updated => Ok(()),
            PutOutcome::Exists { .. } => Err(NetError::CacheExist),
        }
    }

    /// Current payload; a detected signature prefix is stripped.
    pub async fn get(&self, key: &str) -> Result<Option<String>, NetError> {
        match self.store.get(key).await? {
            Some(value) => Ok(Some(strip_signature(&value).to_string())),
            None => Ok(None),
        }
    }

    /// Delete the key when owned; absence is success.
    pub async fn delete(&self, key: &str, signature: [u8; 8]) -> Result<(), NetError> {
        let sign_str = build_signature(signature);
        match self.store.delete_if_signed(key, &sign_str).await? {
            DeleteOutcome::Deleted | DeleteOutcome::NotFound => Ok(()),
            DeleteOutcome::SignatureMismatch => {
                Err(NetError::other("delete error: invalid signature"))
            },
        }
    }
}

/// Background renewal of one cache entry.
pub struct KeepaliveTask {
    /// `None` once cancelled; detaches the task from the cache.
    cache: Mutex<Option<Arc<Cache>>>,
    timer_task: Mutex<Option<Arc<TimerTask>>>,
    retry_count: AtomicU32,

    key: String,
    value: String,
    signature: String,
    expire_sec: i64,
    interval: Duration,
    retry_num: u32,
    retry_delay: Duration,
    callback: KeepaliveCallback,
    self_ref: OnceCell<Weak<Self>>,
}

impl fmt::Debug for KeepaliveTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepaliveTask")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("signature", &self.signature)
            .field("expire_sec", &self.expire_sec)
            .field("interval", &self.interval)
            .field("retry_count", &self.retry_count)
            .field("retry_num", &self.retry_num)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl KeepaliveTask {
    #[allow(clippy::too_many_arguments)]
    fn create(
        cache: Arc<Cache>,
        key: String,
        value: String,
        signature: String,
        expire_sec: i64,
        interval: Duration,
        retry_num: u32,
        retry_delay: Duration,
        callback: KeepaliveCallback,
    ) -> Arc<Self> {
        let task = Arc::new(Self {
            cache: Mutex::new(Some(cache)),
            timer_task: Mutex::new(None),
            retry_count: AtomicU32::new(0),
            key,
            value,
            signature,
            expire_sec,
            interval,
            retry_num,
            retry_delay,
            callback,
            self_ref: OnceCell::new(),
        });
        let _ = task.self_ref.set(Arc::downgrade(&task));
        task
    }

    fn start(&self) {
        self.add_task(self.interval);
    }

    fn add_task(&self, delay: Duration) {
        let Some(cache) = self.cache.lock().clone() else {
            return;
        };
        let Some(task_weak) = self.self_ref.get().cloned() else {
            return;
        };
        let timer_task = cache.sec_timer.add(
            delay,
            Arc::new(move || {
                if let Some(task) = Weak::upgrade(&task_weak) {
                    tokio::spawn(async move { task.run_once().await });
                }
            }),
        );
        *self.timer_task.lock() = Some(timer_task);
    }

    async fn run_once(self: Arc<Self>) {
        let Some(cache) = self.cache.lock().clone() else {
            return;
        };
        let result = cache
            .insert_or_update(&self.key, &self.value, &self.signature, self.expire_sec)
            .await;
        let retry_count = self.retry_count.load(Ordering::Acquire);
        let callback = Arc::clone(&self.callback);
        let outcome = result.as_ref().err();
        if catch_unwind(AssertUnwindSafe(|| callback(outcome, retry_count))).is_err() {
            error!("keepalive callback runtime error");
        }
        if self.cache.lock().is_none() {
            // cancelled while the round-trip was in flight
            return;
        }
        if result.is_err() {
            if self.retry_num > retry_count {
                self.retry_count.fetch_add(1, Ordering::AcqRel);
                self.add_task(self.retry_delay);
            } else {
                // retry budget spent, resume the normal cadence
                self.retry_count.store(0, Ordering::Release);
                self.add_task(self.interval);
            }
        } else {
            self.retry_count.store(0, Ordering::Release);
            self.add_task(self.interval);
        }
    }

    /// Idempotent; removes the pending wheel task and detaches from the
    /// cache.
    pub fn cancel(&self) {
        let cache = self.cache.lock().take();
        let timer_task = self.timer_task.lock().take();
        if let (Some(cache), Some(timer_task)) = (cache, timer_task) {
            cache.sec_timer.remove(&timer_task);
        }
    }
}
