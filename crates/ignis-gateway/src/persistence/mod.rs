// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage collaborator for the gateway.
//!
//! [`Store`] is the narrow record-access interface used by the job service,
//! webhook delivery and the HTTP layer. The handle is constructed once by the
//! process entry point and shared as `Arc<dyn Store>`.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    ApiKeyRecord, CallbackSubscription, DeliveryRecord, EventKind, Job, NewApiKey, NewDelivery,
    NewJob, NewSubscription,
};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query execution failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded migrations failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back to a domain record.
    #[error("Corrupt {table} row: {details}")]
    Corrupt {
        /// Table the row came from.
        table: &'static str,
        /// What failed to decode.
        details: String,
    },

    /// The database URL names no supported backend.
    #[error("Unsupported database URL scheme: {0}")]
    UnsupportedUrl(String),
}

/// Record-access interface over the relational store.
///
/// Soft-deleted subscriptions are invisible to every read.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a job with status `received`.
    async fn create_job(&self, job: &NewJob) -> Result<Job, StoreError>;

    /// Find a job by its public identifier.
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// All jobs submitted by `owner_id`, newest first.
    async fn list_jobs_for_owner(&self, owner_id: &str) -> Result<Vec<Job>, StoreError>;

    /// Persist status and worker output fields of `job`.
    async fn update_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Register a callback subscription.
    async fn create_subscription(
        &self,
        subscription: &NewSubscription,
    ) -> Result<CallbackSubscription, StoreError>;

    /// Find a subscription by id.
    async fn get_subscription(&self, id: i64) -> Result<Option<CallbackSubscription>, StoreError>;

    /// Subscriptions owned by `owner_id`, optionally filtered by the active flag.
    async fn list_subscriptions(
        &self,
        owner_id: &str,
        active: Option<bool>,
    ) -> Result<Vec<CallbackSubscription>, StoreError>;

    /// Persist url, secret, events and the active flag. Returns `false` if
    /// the subscription is gone.
    async fn update_subscription(
        &self,
        subscription: &CallbackSubscription,
    ) -> Result<bool, StoreError>;

    /// Soft-delete a subscription. Returns `false` if it did not exist.
    async fn delete_subscription(&self, id: i64) -> Result<bool, StoreError>;

    /// Open a delivery record with zero attempts.
    async fn create_delivery(&self, delivery: &NewDelivery) -> Result<DeliveryRecord, StoreError>;

    /// Persist the mutable fields of a delivery record.
    async fn update_delivery(&self, delivery: &DeliveryRecord) -> Result<(), StoreError>;

    /// Find a delivery record by id.
    async fn get_delivery(&self, id: i64) -> Result<Option<DeliveryRecord>, StoreError>;

    /// Delivery records for a subscription, newest first.
    async fn list_deliveries(
        &self,
        subscription_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Undelivered records whose deferred retry is due at `now`, oldest first.
    async fn deliveries_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;

    /// Store a hashed API key.
    async fn create_api_key(&self, key: &NewApiKey) -> Result<ApiKeyRecord, StoreError>;

    /// Find a non-deleted API key by the hash of the raw key.
    async fn find_api_key_by_hash(&self, key_hash: &str)
    -> Result<Option<ApiKeyRecord>, StoreError>;

    /// Find a non-deleted API key by id.
    async fn get_api_key(&self, id: i64) -> Result<Option<ApiKeyRecord>, StoreError>;

    /// Non-deleted API keys owned by `owner_id`, oldest first.
    async fn list_api_keys(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, StoreError>;

    /// Enable or disable an API key. Returns `false` if it does not exist.
    async fn set_api_key_active(&self, id: i64, active: bool) -> Result<bool, StoreError>;

    /// Soft-delete an API key. Returns `false` if it did not exist.
    async fn delete_api_key(&self, id: i64) -> Result<bool, StoreError>;

    /// Record a successful authentication.
    async fn touch_api_key(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Check that the store is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Connect to the backend named by `database_url` and run its migrations.
pub async fn connect(database_url: &str) -> Result<Arc<dyn Store>, StoreError> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = PostgresStore::new(pool);
        store.migrate().await?;
        Ok(Arc::new(store))
    } else if database_url.starts_with("sqlite:") {
        // Every connection to `sqlite::memory:` opens a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = SqliteStore::new(pool);
        store.migrate().await?;
        Ok(Arc::new(store))
    } else {
        let scheme = database_url.split(':').next().unwrap_or_default();
        Err(StoreError::UnsupportedUrl(scheme.to_string()))
    }
}

// ============================================================================
// Row types shared by both backends
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    id: i64,
    job_id: String,
    language: String,
    code: String,
    status: String,
    message: Option<String>,
    error: Option<String>,
    stdout: Option<String>,
    stderr: Option<String>,
    exec_duration: i64,
    mem_usage: i64,
    owner_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|e| corrupt("jobs", e))?;
        Ok(Job {
            id: row.id,
            job_id: row.job_id,
            language: row.language,
            code: row.code,
            status,
            message: row.message,
            error: row.error,
            stdout: row.stdout,
            stderr: row.stderr,
            exec_duration: row.exec_duration,
            mem_usage: row.mem_usage,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SubscriptionRow {
    id: i64,
    owner_id: String,
    url: String,
    secret: Option<String>,
    events: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for CallbackSubscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let events: Vec<EventKind> =
            serde_json::from_str(&row.events).map_err(|e| corrupt("webhook_subscriptions", e))?;
        Ok(CallbackSubscription {
            id: row.id,
            owner_id: row.owner_id,
            url: row.url,
            secret: row.secret,
            events,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DeliveryRow {
    id: i64,
    subscription_id: i64,
    event: String,
    job_id: String,
    payload: String,
    delivered: bool,
    status_code: Option<i32>,
    response_body: Option<String>,
    attempt_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DeliveryRow> for DeliveryRecord {
    type Error = StoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let event = row
            .event
            .parse()
            .map_err(|e| corrupt("webhook_deliveries", e))?;
        Ok(DeliveryRecord {
            id: row.id,
            subscription_id: row.subscription_id,
            event,
            job_id: row.job_id,
            payload: row.payload,
            delivered: row.delivered,
            status_code: row.status_code,
            response_body: row.response_body,
            attempt_count: row.attempt_count,
            next_retry_at: row.next_retry_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ApiKeyRow {
    id: i64,
    name: String,
    key_hash: String,
    key_prefix: String,
    owner_id: String,
    active: bool,
    rate_limit: i32,
    last_used_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ApiKeyRow> for ApiKeyRecord {
    fn from(row: ApiKeyRow) -> Self {
        ApiKeyRecord {
            id: row.id,
            name: row.name,
            key_hash: row.key_hash,
            key_prefix: row.key_prefix,
            owner_id: row.owner_id,
            active: row.active,
            rate_limit: row.rate_limit,
            last_used_at: row.last_used_at,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

pub(crate) fn encode_events(events: &[EventKind]) -> Result<String, StoreError> {
    serde_json::to_string(events).map_err(|e| corrupt("webhook_subscriptions", e))
}

fn corrupt(table: &'static str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        table,
        details: err.to_string(),
    }
}

pub(crate) fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}
