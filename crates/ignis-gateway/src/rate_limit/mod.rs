// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Admission control.
//!
//! [`AdmissionControl`] gates inbound requests with one of two strategies,
//! chosen once at construction:
//!
//! | Strategy | Algorithm | State |
//! |----------|-----------|-------|
//! | Coordinated | sliding-window log, exact bound per window | Redis sorted set per key |
//! | Local | token bucket, smoothed approximation | in-process map |
//!
//! The two are not numerically equivalent. When the coordinated backend fails
//! for a single call, that call is decided by the local buckets instead, so a
//! Redis outage mid-operation shows up as a step change in effective limits.

pub mod coordinated;
pub mod key;
pub mod local;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

pub use self::coordinated::CoordinatedLimiter;
pub use self::key::{Scope, api_key_key, fingerprint, global_key, user_key};
pub use self::local::LocalLimiter;

/// Admission control errors.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// A limit of zero or an empty window cannot be enforced.
    #[error("Invalid quota: {limit} requests per {window:?}")]
    InvalidQuota {
        /// Requested limit.
        limit: u32,
        /// Requested window.
        window: Duration,
    },

    /// The coordinated backend rejected a command or could not be reached.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A coordinated backend call exceeded its bound.
    #[error("Redis call timed out after {0:?}")]
    Timeout(Duration),
}

/// Which strategy decided a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Redis sliding-window log.
    Coordinated,
    /// In-process token bucket.
    Local,
}

impl StrategyKind {
    /// Name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Coordinated => "coordinated",
            StrategyKind::Local => "local",
        }
    }
}

/// Strategy selected once when admission control is built.
pub enum LimiterStrategy {
    /// Redis is reachable. `fallback` decides single calls the backend fails.
    Coordinated {
        /// Shared sliding-window backend.
        backend: CoordinatedLimiter,
        /// Buckets used when a backend call fails.
        fallback: LocalLimiter,
    },
    /// Redis is not configured or was unreachable at startup.
    Local(LocalLimiter),
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Best-effort estimate of requests left in the window.
    pub remaining: u32,
    /// Limit that was applied.
    pub limit: u32,
    /// Window that was applied.
    pub window: Duration,
    /// Approximate reset time, `now + window`.
    pub reset_at: DateTime<Utc>,
    /// Strategy that made the decision.
    pub strategy: StrategyKind,
}

impl RateLimitDecision {
    /// A denial made without consulting any bucket, for quotas that admit nothing.
    pub fn denied(limit: u32, window: Duration, strategy: StrategyKind) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit,
            window,
            reset_at: reset_time(window),
            strategy,
        }
    }
}

/// Request gate choosing between coordinated and local limiting.
pub struct AdmissionControl {
    strategy: LimiterStrategy,
}

impl AdmissionControl {
    /// Build admission control, connecting to `redis_url` if one is given.
    ///
    /// Never fails: a missing, malformed or unreachable URL selects the local
    /// strategy for the lifetime of the process.
    pub async fn connect(
        redis_url: Option<&str>,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Self {
        let Some(url) = redis_url else {
            info!("No Redis URL configured, using in-memory rate limiting");
            return Self::local();
        };

        match CoordinatedLimiter::connect(url, connect_timeout, call_timeout).await {
            Ok(backend) => {
                info!("Connected to Redis for distributed rate limiting");
                Self::coordinated(backend)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, falling back to in-memory rate limiting");
                Self::local()
            }
        }
    }

    /// Local-only admission control.
    pub fn local() -> Self {
        Self {
            strategy: LimiterStrategy::Local(LocalLimiter::new()),
        }
    }

    /// Coordinated admission control over an already connected backend.
    pub fn coordinated(backend: CoordinatedLimiter) -> Self {
        Self {
            strategy: LimiterStrategy::Coordinated {
                backend,
                fallback: LocalLimiter::new(),
            },
        }
    }

    /// Strategy chosen at construction.
    pub fn strategy_kind(&self) -> StrategyKind {
        match self.strategy {
            LimiterStrategy::Coordinated { .. } => StrategyKind::Coordinated,
            LimiterStrategy::Local(_) => StrategyKind::Local,
        }
    }

    /// The in-process buckets: the local strategy or the coordinated fallback.
    pub fn local_limiter(&self) -> &LocalLimiter {
        match &self.strategy {
            LimiterStrategy::Coordinated { fallback, .. } => fallback,
            LimiterStrategy::Local(local) => local,
        }
    }

    /// Admit or deny one request for `key` under `limit` per `window`.
    ///
    /// Only an invalid quota is an error. Backend failures degrade the call to
    /// the local buckets.
    pub async fn allow(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, RateLimitError> {
        if limit == 0 || window.is_zero() {
            return Err(RateLimitError::InvalidQuota { limit, window });
        }

        let (allowed, remaining, strategy) = match &self.strategy {
            LimiterStrategy::Coordinated { backend, fallback } => {
                match backend.allow(key, limit, window).await {
                    Ok(decision) => (decision.allowed, decision.remaining, StrategyKind::Coordinated),
                    Err(e) => {
                        warn!(error = %e, key = %key, "Coordinated rate limit failed, deciding locally");
                        let decision = fallback.allow(key, limit, window)?;
                        (decision.allowed, decision.remaining, StrategyKind::Local)
                    }
                }
            }
            LimiterStrategy::Local(local) => {
                let decision = local.allow(key, limit, window)?;
                (decision.allowed, decision.remaining, StrategyKind::Local)
            }
        };

        if !allowed {
            debug!(key = %key, limit, strategy = strategy.as_str(), "Request denied");
        }

        Ok(RateLimitDecision {
            allowed,
            remaining,
            limit,
            window,
            reset_at: reset_time(window),
            strategy,
        })
    }

    /// Clear all state for `key` under the active strategy.
    pub async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        match &self.strategy {
            LimiterStrategy::Coordinated { backend, fallback } => {
                fallback.reset(key);
                backend.reset(key).await
            }
            LimiterStrategy::Local(local) => {
                local.reset(key);
                Ok(())
            }
        }
    }
}

fn reset_time(window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| Utc::now().checked_add_signed(w))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Periodically clears the in-process bucket map to bound its memory.
pub struct BucketSweeper {
    admission: Arc<AdmissionControl>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl BucketSweeper {
    /// Create a sweeper running every `interval`.
    pub fn new(admission: Arc<AdmissionControl>, interval: Duration) -> Self {
        Self {
            admission,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Bucket sweeper started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!("Bucket sweeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    let cleared = self.admission.local_limiter().sweep();
                    debug!(cleared, "Swept local rate-limit buckets");
                }
            }
        }
    }
}
