// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::{
    errors::NetError,
    timewheel::TimerTask,
    utils::safechan::SafeChannel,
};

/// Application hooks of the election coordinator. All handler callbacks
/// run serially on the coordinator's task loop.
pub trait MsHandler<D>: Send + Sync + 'static {
    /// Preparation for mainship; an error aborts the promotion.
    fn on_be_main_service(&self) -> anyhow::Result<()>;
    fn on_be_main_service_failed(&self);
    fn on_leave_main_service(&self);
    fn on_task_data(&self, data_type: i32, data: D);
    fn on_keep_tick(&self);
}

enum MsTask<D> {
    Keep,
    Custom { data_type: i32, data: D },
}

/// Lease-based singleton election over the distribution cache.
///
/// At most one replica cluster-wide holds `main_srv = true` at any
/// instant; conflicts resolve through the store's atomic signature check.
pub struct MsService<D, H> {
    options: crate::master::options::MsOptions<H>,

    check_task: Mutex<Option<Arc<TimerTask>>>,
    main_srv: AtomicBool,
    main_srv_inst_id: Mutex<Option<String>>,
    task_chan: SafeChannel<MsTask<D>>,
    closed: AtomicBool,
    self_ref: OnceCell<Weak<Self>>,
}

impl<D, H> MsService<D, H>
where
    D: Send + 'static,
    H: MsHandler<D>,
{
    pub fn new(
        options: crate::master::options::MsOptions<H>,
    ) -> Result<Arc<Self>, NetError> {
        options.check()?;
        let service = Arc::new(Self {
            options,
            check_task: Mutex::new(None),
            main_srv: AtomicBool::new(false),
            main_srv_inst_id: Mutex::new(None),
            task_chan: SafeChannel::new(1),
            closed: AtomicBool::new(false),
            self_ref: OnceCell::new(),
        });
        let _ = service.self_ref.set(Arc::downgrade(&service));
        Ok(service)
    }

    fn self_arc(&self) -> Option<Arc<Self>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    pub async fn start(&self) -> Result<(), NetError> {
        self.spawn_running();
        let tick = Duration::from_secs(self.options.tick_interval_sec);
        let Some(service) = self.self_ref.get().cloned() else {
            return Err(NetError::NilValue);
        };
        let check_task = self.options.tw_timer.add_cron(
            tick,
            Arc::new(move || {
                if let Some(service) = service.upgrade() {
                    service.time_tick();
                }
            }),
        );
        *self.check_task.lock() = Some(check_task);
        // opportunistic first promotion
        if let Err(err) = self.try_to_be_main_service(true).await {
            info!(srv_name = %self.options.srv_name, error = %err,
                "try to be main service failed");
        }
        Ok(())
    }

    /// Yields leadership deterministically: the lease is deleted when this
    /// replica is main.
    pub async fn stop(&self) -> Result<(), NetError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(check_task) = self.check_task.lock().take() {
            self.options.tw_timer.remove(&check_task);
        }
        self.task_chan.close();
        if self.main_srv.load(Ordering::Acquire) {
            self.delete_dcache().await;
        }
        Ok(())
    }

    pub fn is_main_service(&self) -> bool {
        self.main_srv.load(Ordering::Acquire)
    }

    pub fn service_id(&self) -> &str {
        &self.options.service_id
    }

    /// Own id when main, else the cached peer id, else a store read.
    pub async fn get_main_service_id(&self) -> String {
        if self.is_main_service() {
            return self.options.service_id.clone();
        }
        let cached = self.main_srv_inst_id.lock().clone();
        match cached {
            Some(id) => id,
            None => self.get_latest_main_service_id().await,
        }
    }

    /// Re-read the lease holder from the store.
    pub async fn get_latest_main_service_id(&self) -> String {
        if self.is_main_service() {
            *self.main_srv_inst_id.lock() = None;
            return self.options.service_id.clone();
        }
        match self.options.cache.get(&self.options.distribution_cache_key).await {
            Ok(Some(current_id)) => {
                *self.main_srv_inst_id.lock() = Some(current_id.clone());
                current_id
            },
            Ok(None) => {
                *self.main_srv_inst_id.lock() = None;
                String::new()
            },
            Err(err) => {
                error!(error = %err, "get main service cache failed");
                String::new()
            },
        }
    }

    /// Route custom work through the serialized task loop.
    pub async fn add_task(&self, data_type: i32, data: D, wait: bool) -> bool {
        self.add_task_impl(MsTask::Custom { data_type, data }, wait)
            .await
    }

    async fn add_task_impl(&self, task: MsTask<D>, wait: bool) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        if wait {
            self.task_chan.blocking_put(None, task).await.is_ok()
        } else {
            self.task_chan.put(task).is_ok()
        }
    }

    fn time_tick(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let Some(service) = self.self_arc() else { return };
        tokio::spawn(async move {
            let retry_times = 2;
            for attempt in 0..retry_times {
                if service.closed.load(Ordering::Acquire) {
                    return;
                }
                if service.task_chan.put(MsTask::Keep).is_ok() {
                    return;
                }
                if attempt != retry_times - 1 {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
    }

    fn spawn_running(&self) {
        let Some(this) = self.self_arc() else { return };
        tokio::spawn(async move {
            let task = tokio::spawn(Arc::clone(&this).running());
            if let Err(err) = task.await
                && err.is_panic()
            {
                error!(srv_name = %this.options.srv_name, "master service task loop panicked");
                if !this.closed.load(Ordering::Acquire) {
                    this.spawn_running();
                }
            }
        });
    }

    async fn running(self: Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        loop {
            let task = match self.task_chan.blocking_get(None).await {
                Ok(task) => task,
                Err(_) => return,
            };
            match task {
                MsTask::Keep => {
                    if let Err(err) = self.keep_main_service().await {
                        error!(srv_name = %self.options.srv_name, error = %err,
                            "keep main service failed");
                    }
                },
                MsTask::Custom { data_type, data } => {
                    self.options.handler.on_task_data(data_type, data);
                },
            }
        }
    }

    async fn keep_main_service(&self) -> Result<(), NetError> {
        let result = self.keep_main_service_inner().await;
        self.options.handler.on_keep_tick();
        result
    }

    async fn keep_main_service_inner(&self) -> Result<(), NetError> {
        if self.main_srv.load(Ordering::Acquire) {
            *self.main_srv_inst_id.lock() = None;
            // refresh the lease
            match self.refresh_lease().await {
                Ok(()) => Ok(()),
                Err(NetError::CacheExist) => {
                    // another replica holds the lease: demote, never delete
                    // what is not ours
                    self.leave_main_service(false).await;
                    Ok(())
                },
                // stay main on transient errors, an empty-leader window is
                // worse than a stale one
                Err(err) => Err(err),
            }
        } else {
            match self
                .options
                .cache
                .get(&self.options.distribution_cache_key)
                .await?
            {
                Some(current_id) => {
                    *self.main_srv_inst_id.lock() = Some(current_id.clone());
                    if current_id == self.options.service_id {
                        // our id survived a restart or a failed renewal,
                        // reclaim mainship
                        if let Err(err) = self.try_to_be_main_service(false).await {
                            self.delete_dcache().await;
                            return Err(err);
                        }
                    }
                    Ok(())
                },
                None => {
                    *self.main_srv_inst_id.lock() = None;
                    self.try_to_be_main_service(true).await
                },
            }
        }
    }

    async fn refresh_lease(&self) -> Result<(), NetError> {
        self.options
            .cache
            .add_or_update(
                &self.options.distribution_cache_key,
                &self.options.service_id,
                self.options.distribution_cache_signature,
                self.options.distribution_cache_expire_sec,
                0,
                0,
                0,
                None,
            )
            .await
            .map(|_| ())
    }

    async fn try_to_be_main_service(
        &self,
        delete_cache_on_err: bool,
    ) -> Result<(), NetError> {
        self.refresh_lease().await?;
        if let Err(err) = self.options.handler.on_be_main_service() {
            self.options.handler.on_be_main_service_failed();
            if delete_cache_on_err {
                self.delete_dcache().await;
            }
            return Err(NetError::other(format!("on be main service: {err}")));
        }
        self.main_srv.store(true, Ordering::Release);
        Ok(())
    }

    async fn leave_main_service(&self, delete_dcache: bool) {
        if delete_dcache {
            self.delete_dcache().await;
        }
        self.options.handler.on_leave_main_service();
        self.main_srv.store(false, Ordering::Release);
    }

    async fn delete_dcache(&self) {
        if let Err(err) = self
            .options
            .cache
            .delete(
                &self.options.distribution_cache_key,
                self.options.distribution_cache_signature,
            )
            .await
        {
            error!(error = %err, "delete distribution cache failed");
        }
    }
}
