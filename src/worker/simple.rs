// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tracing::error;

use crate::{
    errors::NetError,
    worker::{WorkerJob, WorkerLocal},
};

/// Executes submitted jobs inline on the caller.
#[derive(Default)]
pub struct SimpleWorkerPool {
    closed: AtomicBool,
    local: Mutex<WorkerLocal>,
}

impl SimpleWorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, _group: u64, job: WorkerJob) -> Result<(), NetError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::WorkerPoolClosed);
        }
        let mut local = self.local.lock();
        if catch_unwind(AssertUnwindSafe(move || job(&mut local))).is_err() {
            error!("simple worker pool run task error");
        }
        Ok(())
    }

    pub fn shutdown(&self) -> Result<(), NetError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(NetError::WorkerPoolClosed);
        }
        Ok(())
    }
}
