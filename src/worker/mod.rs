// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Fixed-slot pool with bounded per-worker queues.
pub mod fixed;
/// Inline executor for tests and adapters.
pub mod simple;

use std::{any::Any, collections::HashMap};

pub use fixed::FixedWorkerPool;
pub use simple::SimpleWorkerPool;

/// A job routed to one worker slot.
pub type WorkerJob = Box<dyn FnOnce(&mut WorkerLocal) + Send + 'static>;

/// Per-worker state map handed to every job a worker runs, enabling
/// per-slot state without shared locks.
#[derive(Default)]
pub struct WorkerLocal {
    local_map: HashMap<String, Box<dyn Any + Send>>,
}

impl WorkerLocal {
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.local_map.get(key).and_then(|value| value.downcast_ref())
    }

    pub fn get_mut<T: 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.local_map
            .get_mut(key)
            .and_then(|value| value.downcast_mut())
    }

    pub fn set<T: Any + Send>(&mut self, key: &str, value: T) {
        self.local_map.insert(key.to_string(), Box::new(value));
    }

    pub fn remove(&mut self, key: &str) {
        self.local_map.remove(key);
    }

    pub fn len(&self) -> usize {
        self.local_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_map.is_empty()
    }
}
