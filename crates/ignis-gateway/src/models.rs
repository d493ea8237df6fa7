// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain records shared by the store, the job service and webhook delivery.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a job's language tag.
pub const MAX_LANGUAGE_LEN: usize = 50;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted by the gateway and published to the bus.
    Received,
    /// A worker picked the job up.
    Running,
    /// The worker finished successfully.
    Completed,
    /// The worker reported a failure.
    Failed,
}

impl JobStatus {
    /// Stored/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Received => "received",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Map a worker-reported status onto a job status.
    ///
    /// Workers report `done` for success. Anything outside
    /// `received|running|done|failed` is rejected.
    pub fn from_worker(value: &str) -> Option<Self> {
        match value {
            "received" => Some(JobStatus::Received),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Event emitted when a job enters this status, if any.
    pub fn terminal_event(self) -> Option<EventKind> {
        match self {
            JobStatus::Completed => Some(EventKind::JobCompleted),
            JobStatus::Failed => Some(EventKind::JobFailed),
            JobStatus::Received | JobStatus::Running => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(JobStatus::Received),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Job lifecycle events a callback subscription can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A job completed successfully.
    #[serde(rename = "job.completed")]
    JobCompleted,
    /// A job failed.
    #[serde(rename = "job.failed")]
    JobFailed,
}

impl EventKind {
    /// Wire representation, also used for the `X-Webhook-Event` header.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::JobCompleted => "job.completed",
            EventKind::JobFailed => "job.failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job.completed" => Ok(EventKind::JobCompleted),
            "job.failed" => Ok(EventKind::JobFailed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A stored value did not match any known enum variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

/// A code-execution job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Database primary key.
    pub id: i64,
    /// Public job identifier shared with workers.
    pub job_id: String,
    /// Language runtime requested by the submitter.
    pub language: String,
    /// Source code to execute.
    pub code: String,
    /// Current status.
    pub status: JobStatus,
    /// Worker message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Worker error text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Captured standard output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Execution time reported by the worker, in milliseconds.
    pub exec_duration: i64,
    /// Peak memory reported by the worker, in bytes.
    pub mem_usage: i64,
    /// Identity that submitted the job.
    pub owner_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Snapshot of the job as sent to webhook receivers.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            language: self.language.clone(),
            code: self.code.clone(),
            status: self.status,
            message: self.message.clone(),
            error: self.error.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            exec_duration: self.exec_duration,
            mem_usage: self.mem_usage,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Data needed to insert a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Public job identifier.
    pub job_id: String,
    /// Language runtime.
    pub language: String,
    /// Source code.
    pub code: String,
    /// Submitting identity.
    pub owner_id: String,
}

/// Job fields carried in a webhook payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Public job identifier.
    pub job_id: String,
    /// Language runtime.
    pub language: String,
    /// Source code.
    pub code: String,
    /// Status at the time of the event.
    pub status: JobStatus,
    /// Worker message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Worker error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Captured standard output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Execution time in milliseconds.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub exec_duration: i64,
    /// Peak memory in bytes.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub mem_usage: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// Body of an outbound webhook POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Event kind.
    pub event: EventKind,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Job snapshot.
    pub job: JobSnapshot,
}

/// A registered callback endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackSubscription {
    /// Database primary key.
    pub id: i64,
    /// Owning identity.
    pub owner_id: String,
    /// Target URL.
    pub url: String,
    /// Shared HMAC secret. Never serialized.
    #[serde(skip)]
    pub secret: Option<String>,
    /// Subscribed event kinds.
    pub events: Vec<EventKind>,
    /// Whether deliveries are enabled.
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl CallbackSubscription {
    /// Whether this subscription listens for `event`.
    pub fn subscribes_to(&self, event: EventKind) -> bool {
        self.events.contains(&event)
    }

    /// Signing secret, treating an empty string as absent.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// Data needed to register a subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    /// Owning identity.
    pub owner_id: String,
    /// Target URL.
    pub url: String,
    /// Optional shared secret.
    pub secret: Option<String>,
    /// Subscribed event kinds.
    pub events: Vec<EventKind>,
    /// Initial active flag.
    pub active: bool,
}

/// Audit row for one logical webhook notification.
///
/// Created once per (subscription, event) and mutated in place on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Database primary key, sent as `X-Webhook-Delivery`.
    pub id: i64,
    /// Subscription this delivery belongs to.
    pub subscription_id: i64,
    /// Event kind.
    pub event: EventKind,
    /// Job the event refers to.
    pub job_id: String,
    /// Serialized payload, exactly the bytes that are signed and sent.
    pub payload: String,
    /// Whether a 2xx response was received.
    pub delivered: bool,
    /// Status code of the last attempt; `None` after a transport error.
    pub status_code: Option<i32>,
    /// Truncated response body or transport error text of the last attempt.
    pub response_body: Option<String>,
    /// Number of attempts made.
    pub attempt_count: i32,
    /// When the single deferred retry is due.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Data needed to open a delivery record.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    /// Subscription the delivery targets.
    pub subscription_id: i64,
    /// Event kind.
    pub event: EventKind,
    /// Job the event refers to.
    pub job_id: String,
    /// Serialized payload.
    pub payload: String,
}

/// A hashed API key for the public surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiKeyRecord {
    /// Database primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// SHA-256 hex digest of the raw key.
    #[serde(skip)]
    pub key_hash: String,
    /// First characters of the raw key, for identification.
    pub key_prefix: String,
    /// Owning identity.
    pub owner_id: String,
    /// Whether the key may be used.
    pub active: bool,
    /// Requests per rate-limit window granted to this key.
    pub rate_limit: i32,
    /// Last successful authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Expiry time, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ApiKeyRecord {
    /// Active and not expired at `now`.
    pub fn can_use(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_none_or(|expires| now < expires)
    }
}

/// A freshly issued key. The raw key is only ever shown in this response.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedApiKey {
    /// Stored key metadata.
    #[serde(flatten)]
    pub key: ApiKeyRecord,
    /// Raw key to present in `X-API-Key`.
    pub raw_key: String,
}

/// Data needed to store an API key.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    /// Display name.
    pub name: String,
    /// SHA-256 hex digest of the raw key.
    pub key_hash: String,
    /// Identification prefix.
    pub key_prefix: String,
    /// Owning identity.
    pub owner_id: String,
    /// Requests per window.
    pub rate_limit: i32,
    /// Expiry time, if any.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Job message published to workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSubmission {
    /// Public job identifier.
    pub id: String,
    /// Language runtime.
    pub language: String,
    /// Source code.
    pub code: String,
}

/// Status report consumed from workers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusUpdate {
    /// Public job identifier.
    pub id: String,
    /// One of `received`, `running`, `done`, `failed`.
    pub status: String,
    /// Worker message.
    pub message: String,
    /// Worker error text.
    pub error: String,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Execution time in milliseconds.
    pub exec_duration: i64,
    /// Peak memory in bytes.
    pub mem_usage: i64,
}
