// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for ignis-gateway.
//!
//! [`GatewayRuntime`] owns every long-running task of the gateway: the HTTP
//! server, the webhook delivery pool, the deferred-retry sweeper, the local
//! bucket sweeper and the worker status listener.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ignis_gateway::bus::RedisJobBus;
//! use ignis_gateway::rate_limit::AdmissionControl;
//! use ignis_gateway::runtime::GatewayRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = ignis_gateway::persistence::connect("sqlite:ignis.db").await?;
//!     let bus = RedisJobBus::connect("redis://127.0.0.1/", std::time::Duration::from_secs(5)).await?;
//!
//!     let runtime = GatewayRuntime::builder()
//!         .store(store)
//!         .redis_bus(bus)
//!         .admission(Arc::new(AdmissionControl::local()))
//!         .bind_addr("127.0.0.1:8080".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::bus::{JobBus, RedisJobBus, StatusListener};
use crate::config::{Config, RateLimitSettings, WebhookSettings};
use crate::error::{Error, Result};
use crate::jobs::JobService;
use crate::persistence::Store;
use crate::rate_limit::{AdmissionControl, BucketSweeper};
use crate::server::{self, AppState};
use crate::webhooks::{
    DeliveryRetrySweeper, RetryPolicy, RetrySweeperConfig, WebhookDispatcher, WebhookSender,
};

/// Builder for a [`GatewayRuntime`].
pub struct GatewayRuntimeBuilder {
    store: Option<Arc<dyn Store>>,
    bus: Option<Arc<dyn JobBus>>,
    status_client: Option<redis::Client>,
    admission: Option<Arc<AdmissionControl>>,
    bind_addr: SocketAddr,
    rate_limits: RateLimitSettings,
    local_sweep_interval: Duration,
    webhooks: WebhookSettings,
    retry_policy: RetryPolicy,
}

impl Default for GatewayRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            bus: None,
            status_client: None,
            admission: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            rate_limits: RateLimitSettings::default(),
            local_sweep_interval: Duration::from_secs(600),
            webhooks: WebhookSettings::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl GatewayRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply listen address, limits and webhook settings from `config`.
    pub fn config(mut self, config: &Config) -> Self {
        self.bind_addr = config.http_addr;
        self.rate_limits = config.rate_limits.clone();
        self.local_sweep_interval = config.local_sweep_interval;
        self.webhooks = config.webhooks.clone();
        self
    }

    /// Set the record store (required).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a Redis bus for publishing jobs and for the status listener.
    pub fn redis_bus(mut self, bus: RedisJobBus) -> Self {
        self.status_client = Some(bus.client().clone());
        self.bus = Some(Arc::new(bus));
        self
    }

    /// Set a publish-only bus. No status listener is started.
    pub fn bus(mut self, bus: Arc<dyn JobBus>) -> Self {
        self.bus = Some(bus);
        self.status_client = None;
        self
    }

    /// Set admission control.
    ///
    /// Default: local-only limiting.
    pub fn admission(mut self, admission: Arc<AdmissionControl>) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Set the HTTP bind address.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set request limits.
    pub fn rate_limits(mut self, limits: RateLimitSettings) -> Self {
        self.rate_limits = limits;
        self
    }

    /// Set webhook delivery settings.
    pub fn webhooks(mut self, settings: WebhookSettings) -> Self {
        self.webhooks = settings;
        self
    }

    /// Set the delivery retry policy.
    ///
    /// Default: 3 attempts, `attempt × 2s` backoff, deferred retry after 1 hour.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns [`Error::MissingComponent`] if the store or the bus is missing.
    pub fn build(self) -> Result<GatewayRuntimeConfig> {
        let store = self.store.ok_or(Error::MissingComponent("store"))?;
        let bus = self.bus.ok_or(Error::MissingComponent("bus"))?;

        Ok(GatewayRuntimeConfig {
            store,
            bus,
            status_client: self.status_client,
            admission: self
                .admission
                .unwrap_or_else(|| Arc::new(AdmissionControl::local())),
            bind_addr: self.bind_addr,
            rate_limits: self.rate_limits,
            local_sweep_interval: self.local_sweep_interval,
            webhooks: self.webhooks,
            retry_policy: self.retry_policy,
        })
    }
}

/// Configuration for a [`GatewayRuntime`].
pub struct GatewayRuntimeConfig {
    store: Arc<dyn Store>,
    bus: Arc<dyn JobBus>,
    status_client: Option<redis::Client>,
    admission: Arc<AdmissionControl>,
    bind_addr: SocketAddr,
    rate_limits: RateLimitSettings,
    local_sweep_interval: Duration,
    webhooks: WebhookSettings,
    retry_policy: RetryPolicy,
}

impl GatewayRuntimeConfig {
    /// Bind the HTTP listener and spawn every background task.
    pub async fn start(self) -> Result<GatewayRuntime> {
        let sender = WebhookSender::new(
            self.store.clone(),
            self.webhooks.request_timeout,
            self.retry_policy.clone(),
        )?;

        let (dispatcher, pool) = WebhookDispatcher::new(
            self.store.clone(),
            sender.clone(),
            self.webhooks.max_concurrency,
            self.webhooks.queue_capacity,
        );
        let pool_shutdown = pool.shutdown_handle();
        let pool_handle = tokio::spawn(pool.run());

        let jobs = Arc::new(JobService::new(
            self.store.clone(),
            self.bus.clone(),
            dispatcher,
        ));

        let retry_sweeper = if self.webhooks.sweep_enabled {
            let sweeper = DeliveryRetrySweeper::new(
                self.store.clone(),
                sender,
                RetrySweeperConfig::from(&self.webhooks),
            );
            let shutdown = sweeper.shutdown_handle();
            Some((shutdown, tokio::spawn(sweeper.run())))
        } else {
            debug!("Deferred delivery retries disabled");
            None
        };

        let bucket_sweeper = BucketSweeper::new(self.admission.clone(), self.local_sweep_interval);
        let bucket_shutdown = bucket_sweeper.shutdown_handle();
        let bucket_handle = tokio::spawn(bucket_sweeper.run());

        let status_listener = self.status_client.map(|client| {
            let listener = StatusListener::new(client, jobs.clone());
            let shutdown = listener.shutdown_handle();
            (shutdown, tokio::spawn(listener.run()))
        });

        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let router = server::router(AppState::new(
            jobs.clone(),
            self.store.clone(),
            self.admission.clone(),
            self.rate_limits.clone(),
        ));
        let server_shutdown = Arc::new(Notify::new());
        let server_handle = tokio::spawn(server::serve(listener, router, server_shutdown.clone()));

        info!(
            addr = %local_addr,
            rate_limit_strategy = self.admission.strategy_kind().as_str(),
            status_listener = status_listener.is_some(),
            retry_sweeper = retry_sweeper.is_some(),
            "GatewayRuntime started"
        );

        Ok(GatewayRuntime {
            local_addr,
            jobs,
            server_shutdown,
            server_handle,
            status_listener,
            bucket_shutdown,
            bucket_handle,
            retry_sweeper,
            pool_shutdown,
            pool_handle,
        })
    }
}

/// A running gateway.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct GatewayRuntime {
    local_addr: SocketAddr,
    jobs: Arc<JobService>,
    server_shutdown: Arc<Notify>,
    server_handle: JoinHandle<std::io::Result<()>>,
    status_listener: Option<(Arc<Notify>, JoinHandle<()>)>,
    bucket_shutdown: Arc<Notify>,
    bucket_handle: JoinHandle<()>,
    retry_sweeper: Option<(Arc<Notify>, JoinHandle<()>)>,
    pool_shutdown: Arc<Notify>,
    pool_handle: JoinHandle<()>,
}

impl GatewayRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> GatewayRuntimeBuilder {
        GatewayRuntimeBuilder::new()
    }

    /// Address the HTTP server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Job service shared with the HTTP surface and the status listener.
    pub fn jobs(&self) -> &Arc<JobService> {
        &self.jobs
    }

    /// Gracefully shut down the runtime.
    ///
    /// Intake stops first (HTTP server, status listener). The delivery pool
    /// then drains: queued deliveries are started and every delivery already
    /// in its retry loop runs to completion.
    pub async fn shutdown(self) -> Result<()> {
        info!("GatewayRuntime shutting down...");

        self.server_shutdown.notify_one();
        if let Some((shutdown, _)) = &self.status_listener {
            shutdown.notify_one();
        }

        let server_result = self.server_handle.await;

        if let Some((_, handle)) = self.status_listener
            && let Err(e) = handle.await
        {
            error!("Status listener task panicked: {}", e);
        }

        self.bucket_shutdown.notify_one();
        if let Some((shutdown, _)) = &self.retry_sweeper {
            shutdown.notify_one();
        }
        self.pool_shutdown.notify_one();

        if let Err(e) = self.bucket_handle.await {
            error!("Bucket sweeper task panicked: {}", e);
        }
        if let Some((_, handle)) = self.retry_sweeper
            && let Err(e) = handle.await
        {
            error!("Retry sweeper task panicked: {}", e);
        }
        if let Err(e) = self.pool_handle.await {
            error!("Delivery pool task panicked: {}", e);
        }

        match server_result {
            Ok(Ok(())) => {
                info!("GatewayRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("HTTP server error during shutdown: {}", e);
                Err(e.into())
            }
            Err(e) => {
                error!("HTTP server task panicked: {}", e);
                Err(Error::TaskPanicked("server", e.to_string()))
            }
        }
    }

    /// Check if every task is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
            && !self.bucket_handle.is_finished()
            && !self.pool_handle.is_finished()
            && self
                .status_listener
                .as_ref()
                .is_none_or(|(_, handle)| !handle.is_finished())
            && self
                .retry_sweeper
                .as_ref()
                .is_none_or(|(_, handle)| !handle.is_finished())
    }
}
