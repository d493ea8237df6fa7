// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deferred-retry sweeper.
//!
//! Deliveries that exhaust their immediate attempts get one `next_retry_at`
//! slot. This worker polls for records past that time and makes exactly one
//! more attempt each. Afterwards the record is delivered or terminally failed;
//! there is no further automatic retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::WebhookError;
use super::sender::WebhookSender;
use crate::config::WebhookSettings;
use crate::models::DeliveryRecord;
use crate::persistence::Store;

/// Retry sweeper configuration.
#[derive(Debug, Clone)]
pub struct RetrySweeperConfig {
    /// How often to poll for due deliveries
    pub poll_interval: Duration,
    /// Maximum deliveries to process per poll
    pub batch_size: i64,
}

impl Default for RetrySweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            batch_size: 50,
        }
    }
}

impl From<&WebhookSettings> for RetrySweeperConfig {
    fn from(settings: &WebhookSettings) -> Self {
        Self {
            poll_interval: settings.sweep_interval,
            batch_size: settings.sweep_batch_size,
        }
    }
}

/// Background worker honouring `next_retry_at`.
pub struct DeliveryRetrySweeper {
    store: Arc<dyn Store>,
    sender: WebhookSender,
    config: RetrySweeperConfig,
    shutdown: Arc<Notify>,
}

impl DeliveryRetrySweeper {
    /// Create a new sweeper.
    pub fn new(store: Arc<dyn Store>, sender: WebhookSender, config: RetrySweeperConfig) -> Self {
        Self {
            store,
            sender,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweeper loop.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Delivery retry sweeper started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!("Delivery retry sweeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.process_due().await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "Processed deferred deliveries"),
                        Err(e) => error!(error = %e, "Failed to process deferred deliveries"),
                    }
                }
            }
        }
    }

    /// Make the deferred attempt for every delivery due now.
    ///
    /// A failure on one record is logged and the batch continues; it stays due
    /// for the next poll. Returns how many records were handled.
    pub async fn process_due(&self) -> Result<usize, WebhookError> {
        let due = self
            .store
            .deliveries_due(Utc::now(), self.config.batch_size)
            .await?;

        let mut handled = 0;
        for record in due {
            let delivery_id = record.id;
            match self.process_one(record).await {
                Ok(()) => handled += 1,
                Err(e) => {
                    error!(delivery_id, error = %e, "Failed to process deferred delivery");
                }
            }
        }
        Ok(handled)
    }

    async fn process_one(&self, record: DeliveryRecord) -> Result<(), WebhookError> {
        let subscription = self.store.get_subscription(record.subscription_id).await?;

        match subscription {
            Some(subscription) if subscription.active => {
                self.sender.redeliver(&subscription, record).await?;
            }
            _ => {
                warn!(
                    delivery_id = record.id,
                    subscription_id = record.subscription_id,
                    "Subscription removed or inactive, abandoning deferred delivery"
                );
                let mut record = record;
                record.next_retry_at = None;
                record.updated_at = Utc::now();
                self.store.update_delivery(&record).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RetrySweeperConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.batch_size, 50);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = WebhookSettings {
            sweep_interval: Duration::from_secs(5),
            sweep_batch_size: 7,
            ..WebhookSettings::default()
        };
        let config = RetrySweeperConfig::from(&settings);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 7);
    }
}
