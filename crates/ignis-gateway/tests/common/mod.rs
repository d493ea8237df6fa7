// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for ignis-gateway integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use ignis_gateway::api_keys::hash_api_key;
use ignis_gateway::bus::{BusError, JobBus};
use ignis_gateway::models::{
    CallbackSubscription, DeliveryRecord, EventKind, JobSnapshot, JobStatus, JobSubmission,
    NewApiKey, NewSubscription, WebhookPayload,
};
use ignis_gateway::persistence::{SqliteStore, Store};
use ignis_gateway::webhooks::RetryPolicy;

/// Redis URL for tests that need a live instance.
pub fn redis_url() -> Option<String> {
    std::env::var("TEST_REDIS_URL").ok()
}

/// Fresh in-memory store with migrations applied.
pub async fn memory_store() -> Arc<dyn Store> {
    Arc::new(SqliteStore::in_memory().await.expect("in-memory store"))
}

/// Bus that records published jobs instead of sending them.
#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<JobSubmission>>,
}

impl RecordingBus {
    /// Jobs published so far.
    pub fn published(&self) -> Vec<JobSubmission> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobBus for RecordingBus {
    async fn publish_job(&self, job: &JobSubmission) -> Result<(), BusError> {
        self.published.lock().unwrap().push(job.clone());
        Ok(())
    }
}

/// Retry policy with millisecond delays.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        deferred_retry: Duration::from_secs(3600),
    }
}

/// Register a subscription for `owner_id`.
pub async fn subscribe(
    store: &Arc<dyn Store>,
    owner_id: &str,
    url: &str,
    secret: Option<&str>,
    events: Vec<EventKind>,
) -> CallbackSubscription {
    store
        .create_subscription(&NewSubscription {
            owner_id: owner_id.to_string(),
            url: url.to_string(),
            secret: secret.map(str::to_string),
            events,
            active: true,
        })
        .await
        .expect("create subscription")
}

/// Store an API key and return the raw key.
pub async fn issue_api_key(store: &Arc<dyn Store>, owner_id: &str, rate_limit: i32) -> String {
    let raw_key = format!("ign_{}", uuid::Uuid::new_v4().simple());
    store
        .create_api_key(&NewApiKey {
            name: "test key".to_string(),
            key_hash: hash_api_key(&raw_key),
            key_prefix: raw_key[..8].to_string(),
            owner_id: owner_id.to_string(),
            rate_limit,
            expires_at: None,
        })
        .await
        .expect("create api key");
    raw_key
}

/// Payload for a finished job.
pub fn payload(event: EventKind, job_id: &str) -> WebhookPayload {
    let now = Utc::now();
    let status = match event {
        EventKind::JobCompleted => JobStatus::Completed,
        EventKind::JobFailed => JobStatus::Failed,
    };
    WebhookPayload {
        event,
        timestamp: now,
        job: JobSnapshot {
            job_id: job_id.to_string(),
            language: "python".to_string(),
            code: "print('hi')".to_string(),
            status,
            message: None,
            error: None,
            stdout: Some("hi\n".to_string()),
            stderr: None,
            exec_duration: 12,
            mem_usage: 4096,
            created_at: now,
            updated_at: now,
        },
    }
}

/// Poll until `subscription_id` has `count` settled delivery records.
///
/// A record is settled once it is delivered or has a deferred retry scheduled.
pub async fn wait_for_deliveries(
    store: &Arc<dyn Store>,
    subscription_id: i64,
    count: usize,
) -> Vec<DeliveryRecord> {
    for _ in 0..200 {
        let records = store
            .list_deliveries(subscription_id, 100, 0)
            .await
            .expect("list deliveries");
        let settled = records
            .iter()
            .filter(|r| r.delivered || r.next_retry_at.is_some())
            .count();
        if settled >= count {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {count} deliveries on subscription {subscription_id}");
}
