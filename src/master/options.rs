// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use crate::{cache::Cache, errors::NetError, timewheel::TimeWheel};

/// Configuration of a master-election coordinator.
pub struct MsOptions<H> {
    pub srv_name: String,
    /// Keep-tick cadence, seconds.
    pub tick_interval_sec: u64,
    /// Lease key shared by the election cohort.
    pub distribution_cache_key: String,
    /// This replica's identity, stored as the lease payload.
    pub service_id: String,
    /// Ownership credential shared by the cohort.
    pub distribution_cache_signature: [u8; 8],
    /// Lease TTL, seconds.
    pub distribution_cache_expire_sec: i64,
    pub tw_timer: TimeWheel,
    pub cache: Arc<Cache>,
    pub handler: Arc<H>,
}

impl<H> MsOptions<H> {
    pub(crate) fn check(&self) -> Result<(), NetError> {
        if self.srv_name.is_empty() {
            return Err(NetError::other("less srv_name"));
        }
        if self.tick_interval_sec == 0 {
            return Err(NetError::other("less tick_interval_sec"));
        }
        if self.distribution_cache_key.is_empty() {
            return Err(NetError::other("less distribution_cache_key"));
        }
        if self.service_id.is_empty() {
            return Err(NetError::other("less service_id"));
        }
        if self.distribution_cache_signature == [0u8; 8] {
            return Err(NetError::other("less distribution_cache_signature"));
        }
        if self.distribution_cache_expire_sec <= 0 {
            return Err(NetError::other("less distribution_cache_expire_sec"));
        }
        Ok(())
    }
}
