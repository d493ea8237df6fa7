// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cross-instance sliding-window log backed by Redis.
//!
//! Every accepted request is recorded as a member of a sorted set scored by
//! its timestamp in microseconds. Eviction, counting and insertion run in one
//! Lua script so concurrent gateways never read-then-write the same key.

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::time::timeout;
use tracing::debug;

use super::RateLimitError;

/// Namespace for every limiter key in Redis.
pub const KEY_PREFIX: &str = "rate_limit";

/// Expiry applied to a window key on every admitted call.
pub const CLEANUP_HORIZON: Duration = Duration::from_secs(3600);

// ARGV[2] is passed to ZADD untouched: Lua would print a microsecond
// timestamp in exponent notation.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local window_start = ARGV[1]
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. window_start)

local current = redis.call('ZCARD', key)
if current < limit then
    redis.call('ZADD', key, ARGV[2], ARGV[4])
    redis.call('EXPIRE', key, tonumber(ARGV[5]))
    return {1, limit - current - 1}
end
return {0, 0}
"#;

/// Outcome of a coordinated admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    /// Whether the request was recorded in the window.
    pub allowed: bool,
    /// `limit - current - 1` when allowed, otherwise 0.
    pub remaining: u32,
}

/// Sliding-window-log limiter shared by every gateway instance.
#[derive(Clone)]
pub struct CoordinatedLimiter {
    conn: ConnectionManager,
    script: redis::Script,
    call_timeout: Duration,
}

impl CoordinatedLimiter {
    /// Connect and check the backend with `PING`.
    ///
    /// Both the connection and the `PING` are bounded by `connect_timeout`.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url)?;

        let mut conn = timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| RateLimitError::Timeout(connect_timeout))??;

        let pong: String = timeout(connect_timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| RateLimitError::Timeout(connect_timeout))??;
        debug!(reply = %pong, "Redis reachable");

        Ok(Self {
            conn,
            script: redis::Script::new(SLIDING_WINDOW_SCRIPT),
            call_timeout,
        })
    }

    /// Record a request for `key` if fewer than `limit` fall inside the trailing `window`.
    pub async fn allow(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<WindowDecision, RateLimitError> {
        let now = Utc::now().timestamp_micros();
        let window_micros = i64::try_from(window.as_micros()).unwrap_or(i64::MAX);
        let window_start = now.saturating_sub(window_micros);
        let member = format!("{}-{}", now, uuid::Uuid::new_v4());

        let mut conn = self.conn.clone();
        let mut invocation = self.script.key(redis_key(key));
        invocation
            .arg(window_start)
            .arg(now)
            .arg(limit)
            .arg(member)
            .arg(CLEANUP_HORIZON.as_secs());

        let (allowed, remaining): (i64, i64) =
            timeout(self.call_timeout, invocation.invoke_async(&mut conn))
                .await
                .map_err(|_| RateLimitError::Timeout(self.call_timeout))??;

        Ok(WindowDecision {
            allowed: allowed == 1,
            remaining: u32::try_from(remaining).unwrap_or(0),
        })
    }

    /// Delete the window for `key`.
    pub async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        let _: i64 = timeout(self.call_timeout, conn.del(redis_key(key)))
            .await
            .map_err(|_| RateLimitError::Timeout(self.call_timeout))??;
        Ok(())
    }
}

/// Redis key holding the window for a fingerprinted limiter key.
pub fn redis_key(key: &str) -> String {
    format!("{KEY_PREFIX}:{key}")
}
