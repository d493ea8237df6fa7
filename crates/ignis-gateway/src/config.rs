// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for ignis-gateway.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Gateway configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL; the scheme (`postgres://` or `sqlite:`) selects the store backend.
    pub database_url: String,
    /// HTTP listen address.
    pub http_addr: SocketAddr,
    /// Redis URL for coordinated rate limiting. `None` means local limiting only.
    pub redis_url: Option<String>,
    /// Bound on the Redis connectivity check made at startup.
    pub redis_connect_timeout: Duration,
    /// Bound on each scripted limiter call.
    pub redis_call_timeout: Duration,
    /// Redis URL for the job bus (submissions and worker status updates).
    pub bus_url: String,
    /// Request limits applied by the HTTP middleware.
    pub rate_limits: RateLimitSettings,
    /// How often the local bucket map is cleared.
    pub local_sweep_interval: Duration,
    /// Webhook delivery settings.
    pub webhooks: WebhookSettings,
    /// Emit JSON logs instead of the human-readable format.
    pub json_logs: bool,
}

/// Request limits for the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Window shared by the user and global limits.
    pub window: Duration,
    /// Requests per window for an authenticated user.
    pub user_limit: u32,
    /// Requests per window per endpoint across all callers.
    pub global_limit: u32,
    /// Requests per window granted to newly issued API keys.
    pub api_key_limit: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            user_limit: 100,
            global_limit: 1000,
            api_key_limit: 5,
        }
    }
}

/// Webhook delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSettings {
    /// Timeout for each outbound POST.
    pub request_timeout: Duration,
    /// Maximum deliveries in flight at once.
    pub max_concurrency: usize,
    /// Capacity of the delivery queue before `dispatch` waits.
    pub queue_capacity: usize,
    /// Whether the deferred-retry sweeper runs.
    pub sweep_enabled: bool,
    /// Sweeper poll period.
    pub sweep_interval: Duration,
    /// Maximum deferred deliveries handled per poll.
    pub sweep_batch_size: i64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_concurrency: 32,
            queue_capacity: 1024,
            sweep_enabled: true,
            sweep_interval: Duration::from_secs(60),
            sweep_batch_size: 50,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("IGNIS_DATABASE_URL")
            .ok_or(ConfigError::MissingEnvVar("IGNIS_DATABASE_URL"))?;
        let bus_url = lookup("IGNIS_BUS_URL").ok_or(ConfigError::MissingEnvVar("IGNIS_BUS_URL"))?;

        let port: u16 = parse_or(&lookup, "IGNIS_HTTP_PORT", 8080)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        // An unparseable Redis URL is not fatal: admission control falls back to local limiting.
        let redis_url = lookup("IGNIS_REDIS_URL").filter(|url| !url.trim().is_empty());

        // Limits, windows and intervals must be positive.
        let rate_limits = RateLimitSettings {
            window: Duration::from_secs(parse_positive(
                &lookup,
                "IGNIS_RATE_LIMIT_WINDOW_SECS",
                60,
            )?),
            user_limit: parse_positive(&lookup, "IGNIS_USER_RATE_LIMIT", 100)?,
            global_limit: parse_positive(&lookup, "IGNIS_GLOBAL_RATE_LIMIT", 1000)?,
            api_key_limit: parse_positive(&lookup, "IGNIS_API_KEY_RATE_LIMIT", 5)?,
        };

        let webhooks = WebhookSettings {
            request_timeout: Duration::from_secs(parse_positive(
                &lookup,
                "IGNIS_WEBHOOK_TIMEOUT_SECS",
                30,
            )?),
            max_concurrency: parse_positive(&lookup, "IGNIS_WEBHOOK_MAX_CONCURRENCY", 32)?,
            queue_capacity: parse_positive(&lookup, "IGNIS_WEBHOOK_QUEUE_CAPACITY", 1024)?,
            sweep_enabled: lookup("IGNIS_WEBHOOK_SWEEP_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            sweep_interval: Duration::from_secs(parse_positive(
                &lookup,
                "IGNIS_WEBHOOK_SWEEP_INTERVAL_SECS",
                60,
            )?),
            sweep_batch_size: parse_positive(&lookup, "IGNIS_WEBHOOK_SWEEP_BATCH_SIZE", 50)?,
        };

        Ok(Self {
            database_url,
            http_addr,
            redis_url,
            redis_connect_timeout: Duration::from_millis(parse_positive(
                &lookup,
                "IGNIS_REDIS_CONNECT_TIMEOUT_MS",
                5000,
            )?),
            redis_call_timeout: Duration::from_millis(parse_positive(
                &lookup,
                "IGNIS_REDIS_CALL_TIMEOUT_MS",
                1000,
            )?),
            bus_url,
            rate_limits,
            local_sweep_interval: Duration::from_secs(parse_positive(
                &lookup,
                "IGNIS_LOCAL_SWEEP_INTERVAL_SECS",
                600,
            )?),
            webhooks,
            json_logs: lookup("IGNIS_LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(default),
    }
}

fn parse_positive<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialOrd,
{
    let value = parse_or(lookup, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            name,
            value: lookup(name).unwrap_or_default(),
        });
    }
    Ok(value)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable could not be parsed.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Raw value that failed to parse.
        value: String,
    },
}
