// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::NetError;

/// Outcome of a conditional put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Updated,
    /// The key is held under a different signature; `current` is the
    /// stored value.
    Exists { current: String },
}

/// Outcome of a conditional delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    SignatureMismatch,
}

/// Contract the lease cache needs from a shared key-value store.
///
/// Every operation must be atomic on the store side; a networked store
/// implements each as a single scripted round-trip. The signature prefix
/// is the ownership credential: no non-owner may overwrite or delete.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Insert the value with a TTL when the key is free, or refresh it
    /// when the stored value starts with `signature`.
    async fn put_keep_signature(
        &self,
        key: &str,
        value: &str,
        signature: &str,
        ttl_ms: i64,
    ) -> Result<PutOutcome, NetError>;

    async fn get(&self, key: &str) -> Result<Option<String>, NetError>;

    /// Delete only when the stored value starts with `signature`.
    async fn delete_if_signed(
        &self,
        key: &str,
        signature: &str,
    ) -> Result<DeleteOutcome, NetError>;
}

struct StoredValue {
    value: String,
    expires_at: Instant,
}

/// In-process [`LeaseStore`] with lazy TTL expiry, used by tests and
/// single-node deployments.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &StoredValue) -> bool {
        entry.expires_at > Instant::now()
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn put_keep_signature(
        &self,
        key: &str,
        value: &str,
        signature: &str,
        ttl_ms: i64,
    ) -> Result<PutOutcome, NetError> {
        if ttl_ms <= 0 {
            return Err(NetError::InvalidParams);
        }
        let expires_at = Instant::now() + Duration::from_millis(ttl_ms as u64);
        // the entry guard makes check-and-set atomic per key
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if !Self::is_live(occupied.get()) {
                    occupied.insert(StoredValue { value: value.to_string(), expires_at });
                    return Ok(PutOutcome::Inserted);
                }
                if occupied.get().value.starts_with(signature) {
                    occupied.insert(StoredValue { value: value.to_string(), expires_at });
                    Ok(PutOutcome::Updated)
                } else {
                    Ok(PutOutcome::Exists { current: occupied.get().value.clone() })
                }
            },
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(StoredValue { value: value.to_string(), expires_at });
                Ok(PutOutcome::Inserted)
            },
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, NetError> {
        if let Some(entry) = self.entries.get(key) {
            if Self::is_live(entry.value()) {
                return Ok(Some(entry.value().value.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn delete_if_signed(
        &self,
        key: &str,
        signature: &str,
    ) -> Result<DeleteOutcome, NetError> {
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                if !Self::is_live(occupied.get()) {
                    occupied.remove();
                    return Ok(DeleteOutcome::NotFound);
                }
                if occupied.get().value.starts_with(signature) {
                    occupied.remove();
                    Ok(DeleteOutcome::Deleted)
                } else {
                    Ok(DeleteOutcome::SignatureMismatch)
                }
            },
            dashmap::mapref::entry::Entry::Vacant(_) => Ok(DeleteOutcome::NotFound),
        }
    }
}
