// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ignis gateway server
//!
//! Serves the job API, publishes jobs to workers, consumes their status
//! updates and delivers webhook notifications.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ignis_gateway::bus::RedisJobBus;
use ignis_gateway::config::Config;
use ignis_gateway::persistence;
use ignis_gateway::rate_limit::AdmissionControl;
use ignis_gateway::runtime::GatewayRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let dotenv = dotenvy::dotenv();

    let config = Config::from_env()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "ignis_gateway=info".into());
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if let Err(e) = dotenv {
        warn!("No .env file loaded: {}", e);
    }

    info!(
        http_addr = %config.http_addr,
        coordinated_rate_limiting = config.redis_url.is_some(),
        "Starting ignis gateway"
    );

    let store = persistence::connect(&config.database_url).await?;
    info!("Connected to database");

    let admission = AdmissionControl::connect(
        config.redis_url.as_deref(),
        config.redis_connect_timeout,
        config.redis_call_timeout,
    )
    .await;
    info!(strategy = admission.strategy_kind().as_str(), "Admission control ready");

    let bus = RedisJobBus::connect(&config.bus_url, config.redis_connect_timeout).await?;
    info!("Connected to job bus");

    let runtime = GatewayRuntime::builder()
        .config(&config)
        .store(store)
        .redis_bus(bus)
        .admission(Arc::new(admission))
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Gateway ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("ignis gateway shut down");

    Ok(())
}
