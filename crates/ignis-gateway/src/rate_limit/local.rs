// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process token buckets.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::middleware::StateInformationMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use super::RateLimitError;

type Bucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock, StateInformationMiddleware>;

/// Outcome of a local admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDecision {
    /// Whether a token was consumed.
    pub allowed: bool,
    /// Tokens left in the bucket after this call.
    pub remaining: u32,
}

/// Token-bucket limiter with one lazily created bucket per key.
///
/// Each bucket refills at `limit / window` with a burst of `limit` and keeps the
/// quota it was created with until it is reset or swept.
#[derive(Default)]
pub struct LocalLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl LocalLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one token from the bucket for `key`, creating it on first use.
    pub fn allow(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<LocalDecision, RateLimitError> {
        let quota = quota_for(limit, window)?;

        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                RateLimiter::direct(quota).with_middleware::<StateInformationMiddleware>()
            });

        Ok(match bucket.check() {
            Ok(snapshot) => LocalDecision {
                allowed: true,
                remaining: snapshot.remaining_burst_capacity(),
            },
            Err(_) => LocalDecision {
                allowed: false,
                remaining: 0,
            },
        })
    }

    /// Drop the bucket for `key`; the next call starts at full capacity.
    pub fn reset(&self, key: &str) {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Forget every bucket. Burst history does not survive a sweep.
    pub fn sweep(&self) -> usize {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let cleared = buckets.len();
        buckets.clear();
        cleared
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no bucket exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Quota refilling one token every `window / limit`, bursting to `limit`.
fn quota_for(limit: u32, window: Duration) -> Result<Quota, RateLimitError> {
    let invalid = || RateLimitError::InvalidQuota { limit, window };
    let burst = NonZeroU32::new(limit).ok_or_else(invalid)?;
    let period = window / limit;
    Quota::with_period(period)
        .map(|quota| quota.allow_burst(burst))
        .ok_or_else(invalid)
}
