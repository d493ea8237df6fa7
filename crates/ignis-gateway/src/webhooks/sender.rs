// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signed HTTP delivery with retries and an audit record per notification.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{error, info, warn};

use super::{WebhookError, signer};
use crate::models::{CallbackSubscription, DeliveryRecord, NewDelivery, WebhookPayload};
use crate::persistence::Store;

/// User agent sent with every delivery.
pub const USER_AGENT: &str = "ignis-webhooks/1.0";

/// Maximum number of characters kept from a response body.
pub const RESPONSE_SNAPSHOT_CHARS: usize = 4096;

/// Retry schedule for one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Immediate attempts before the deferred retry is scheduled.
    pub max_attempts: u32,
    /// Linear backoff unit: the wait after attempt `n` is `n * base_delay`.
    pub base_delay: Duration,
    /// Delay before the single deferred retry.
    pub deferred_retry: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            deferred_retry: Duration::from_secs(3600),
        }
    }
}

/// Posts payloads to subscription URLs and records every attempt.
#[derive(Clone)]
pub struct WebhookSender {
    client: Client,
    store: Arc<dyn Store>,
    policy: RetryPolicy,
}

impl WebhookSender {
    /// Create a sender whose requests time out after `request_timeout`.
    pub fn new(
        store: Arc<dyn Store>,
        request_timeout: Duration,
        policy: RetryPolicy,
    ) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            store,
            policy,
        })
    }

    /// Retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `payload` to `subscription`.
    ///
    /// Opens one delivery record, serializes the payload once and makes up to
    /// `max_attempts` sequential attempts. If none succeeds, `next_retry_at` is
    /// set `deferred_retry` into the future.
    pub async fn deliver(
        &self,
        subscription: &CallbackSubscription,
        payload: &WebhookPayload,
    ) -> Result<DeliveryRecord, WebhookError> {
        let body = serde_json::to_string(payload)?;
        let mut record = self
            .store
            .create_delivery(&NewDelivery {
                subscription_id: subscription.id,
                event: payload.event,
                job_id: payload.job.job_id.clone(),
                payload: body,
            })
            .await?;

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if self.attempt(subscription, &mut record).await? {
                return Ok(record);
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.policy.base_delay * attempt).await;
            }
        }

        let now = Utc::now();
        record.next_retry_at = chrono::Duration::from_std(self.policy.deferred_retry)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay));
        record.updated_at = now;
        self.persist(&record).await;

        error!(
            subscription_id = subscription.id,
            delivery_id = record.id,
            attempts = record.attempt_count,
            next_retry_at = ?record.next_retry_at,
            "Webhook delivery failed after all retries"
        );

        Ok(record)
    }

    /// Make the single deferred attempt for `record`.
    ///
    /// `next_retry_at` is cleared whatever the outcome, so the record ends
    /// delivered or terminally failed.
    pub async fn redeliver(
        &self,
        subscription: &CallbackSubscription,
        mut record: DeliveryRecord,
    ) -> Result<DeliveryRecord, WebhookError> {
        record.next_retry_at = None;
        if !self.attempt(subscription, &mut record).await? {
            error!(
                subscription_id = subscription.id,
                delivery_id = record.id,
                attempts = record.attempt_count,
                "Deferred webhook delivery failed, giving up"
            );
        }
        Ok(record)
    }

    /// One signed POST. Updates and persists `record`; returns whether it was delivered.
    async fn attempt(
        &self,
        subscription: &CallbackSubscription,
        record: &mut DeliveryRecord,
    ) -> Result<bool, WebhookError> {
        record.attempt_count += 1;
        let headers = self.headers(subscription, record)?;

        let result = self
            .client
            .post(&subscription.url)
            .headers(headers)
            .body(record.payload.clone())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                record.status_code = Some(i32::from(status.as_u16()));
                record.response_body = Some(truncate(&body));

                if status.is_success() {
                    record.delivered = true;
                    info!(
                        subscription_id = subscription.id,
                        delivery_id = record.id,
                        status_code = status.as_u16(),
                        attempt = record.attempt_count,
                        "Webhook delivered"
                    );
                } else {
                    warn!(
                        subscription_id = subscription.id,
                        delivery_id = record.id,
                        status_code = status.as_u16(),
                        attempt = record.attempt_count,
                        "Webhook delivery failed with non-2xx status"
                    );
                }
            }
            Err(e) => {
                record.status_code = None;
                record.response_body = Some(truncate(&e.to_string()));
                warn!(
                    subscription_id = subscription.id,
                    delivery_id = record.id,
                    attempt = record.attempt_count,
                    error = %e,
                    "Webhook delivery failed"
                );
            }
        }

        record.updated_at = Utc::now();
        self.persist(record).await;
        Ok(record.delivered)
    }

    fn headers(
        &self,
        subscription: &CallbackSubscription,
        record: &DeliveryRecord,
    ) -> Result<HeaderMap, WebhookError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Webhook-Event", HeaderValue::from_static(record.event.as_str()));
        headers.insert("X-Webhook-Delivery", HeaderValue::from(record.id));

        if let Some(secret) = subscription.signing_secret() {
            let signature = signer::signature_header(secret, record.payload.as_bytes())?;
            let value = HeaderValue::from_str(&signature)
                .map_err(|e| WebhookError::Signing(e.to_string()))?;
            headers.insert("X-Webhook-Signature", value);
        }

        Ok(headers)
    }

    // The delivery outcome stands even if the audit write fails.
    async fn persist(&self, record: &DeliveryRecord) {
        if let Err(e) = self.store.update_delivery(record).await {
            error!(delivery_id = record.id, error = %e, "Failed to update delivery record");
        }
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(RESPONSE_SNAPSHOT_CHARS).collect()
}
