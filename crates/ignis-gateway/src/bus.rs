// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message-bus contract with external job workers.
//!
//! Submissions are published as JSON `{id, language, code}` on [`JOBS_CHANNEL`].
//! Workers report progress on channels matching [`STATUS_PATTERN`]; each
//! message is handed to [`JobService::handle_status_message`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::jobs::JobService;
use crate::models::JobSubmission;

/// Channel job submissions are published on.
pub const JOBS_CHANNEL: &str = "jobs";

/// Pattern matching worker status channels.
pub const STATUS_PATTERN: &str = "job_status.*";

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// Redis command or connection failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Message encoding failed.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Connecting took longer than allowed.
    #[error("Bus connection timed out after {0:?}")]
    Timeout(Duration),
}

/// Publishes job submissions to workers.
#[async_trait]
pub trait JobBus: Send + Sync {
    /// Publish a job for execution.
    async fn publish_job(&self, job: &JobSubmission) -> Result<(), BusError>;
}

/// Redis pub/sub implementation of [`JobBus`].
#[derive(Clone)]
pub struct RedisJobBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisJobBus {
    /// Connect to the bus at `url`, bounded by `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let conn = timeout(connect_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| BusError::Timeout(connect_timeout))??;
        Ok(Self { client, conn })
    }

    /// Client used to open subscriber connections.
    pub fn client(&self) -> &redis::Client {
        &self.client
    }
}

#[async_trait]
impl JobBus for RedisJobBus {
    async fn publish_job(&self, job: &JobSubmission) -> Result<(), BusError> {
        let message = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(JOBS_CHANNEL, message).await?;
        debug!(job_id = %job.id, receivers, "Published job");
        Ok(())
    }
}

/// Consumes worker status updates until shutdown.
pub struct StatusListener {
    client: redis::Client,
    jobs: Arc<JobService>,
    reconnect_delay: Duration,
    shutdown: Arc<Notify>,
}

impl StatusListener {
    /// Create a listener feeding `jobs`.
    pub fn new(client: redis::Client, jobs: Arc<JobService>) -> Self {
        Self {
            client,
            jobs,
            reconnect_delay: Duration::from_secs(2),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the listener, reconnecting after subscription failures.
    pub async fn run(self) {
        info!(pattern = STATUS_PATTERN, "Status listener started");

        loop {
            match self.listen().await {
                Ok(()) => break,
                Err(e) => warn!(error = %e, "Status subscription lost, reconnecting"),
            }

            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        info!("Status listener stopped");
    }

    /// Subscribe and process messages. `Ok` means shutdown was requested.
    async fn listen(&self) -> Result<(), BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(STATUS_PATTERN).await?;
        info!("Listening for job status updates");

        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => return Ok(()),
                message = messages.next() => {
                    let Some(message) = message else {
                        return Err(BusError::Redis(redis::RedisError::from((
                            redis::ErrorKind::IoError,
                            "pub/sub stream closed",
                        ))));
                    };
                    if let Err(e) = self.jobs.handle_status_message(message.get_payload_bytes()).await {
                        error!(
                            channel = %message.get_channel_name(),
                            error = %e,
                            "Rejected job status update"
                        );
                    }
                }
            }
        }
    }
}
