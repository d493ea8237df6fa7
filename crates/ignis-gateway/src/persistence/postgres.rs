// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{
    ApiKeyRow, DeliveryRow, JobRow, Store, StoreError, SubscriptionRow, collect, encode_events,
};
use crate::models::{
    ApiKeyRecord, CallbackSubscription, DeliveryRecord, Job, NewApiKey, NewDelivery, NewJob,
    NewSubscription,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgres");

const JOB_COLUMNS: &str = "id, job_id, language, code, status, message, error, stdout, stderr, \
     exec_duration, mem_usage, owner_id, created_at, updated_at";
const SUBSCRIPTION_COLUMNS: &str =
    "id, owner_id, url, secret, events, active, created_at, updated_at";
const DELIVERY_COLUMNS: &str = "id, subscription_id, event, job_id, payload, delivered, \
     status_code, response_body, attempt_count, next_retry_at, created_at, updated_at";
const API_KEY_COLUMNS: &str = "id, name, key_hash, key_prefix, owner_id, active, rate_limit, \
     last_used_at, expires_at, created_at";

/// PostgreSQL-backed [`Store`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_job(&self, job: &NewJob) -> Result<Job, StoreError> {
        let now = Utc::now();
        let row: JobRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO jobs (job_id, language, code, status, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, 'received', $4, $5, $5)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&job.job_id)
        .bind(&job.language)
        .bind(&job.code)
        .bind(&job.owner_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Job::try_from).transpose()
    }

    async fn list_jobs_for_owner(&self, owner_id: &str) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE owner_id = $1 ORDER BY id DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, message = $3, error = $4, stdout = $5, stderr = $6,
                exec_duration = $7, mem_usage = $8, updated_at = $9
            WHERE job_id = $1
            "#,
        )
        .bind(&job.job_id)
        .bind(job.status.as_str())
        .bind(&job.message)
        .bind(&job.error)
        .bind(&job.stdout)
        .bind(&job.stderr)
        .bind(job.exec_duration)
        .bind(job.mem_usage)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_subscription(
        &self,
        subscription: &NewSubscription,
    ) -> Result<CallbackSubscription, StoreError> {
        let now = Utc::now();
        let row: SubscriptionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO webhook_subscriptions (owner_id, url, secret, events, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(&subscription.owner_id)
        .bind(&subscription.url)
        .bind(&subscription.secret)
        .bind(encode_events(&subscription.events)?)
        .bind(subscription.active)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_subscription(&self, id: i64) -> Result<Option<CallbackSubscription>, StoreError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions \
             WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CallbackSubscription::try_from).transpose()
    }

    async fn list_subscriptions(
        &self,
        owner_id: &str,
        active: Option<bool>,
    ) -> Result<Vec<CallbackSubscription>, StoreError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions
            WHERE owner_id = $1 AND deleted_at IS NULL
              AND ($2::BOOLEAN IS NULL OR active = $2)
            ORDER BY id
            "#
        ))
        .bind(owner_id)
        .bind(active)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn update_subscription(
        &self,
        subscription: &CallbackSubscription,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET url = $2, secret = $3, events = $4, active = $5, updated_at = $6
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(subscription.id)
        .bind(&subscription.url)
        .bind(&subscription.secret)
        .bind(encode_events(&subscription.events)?)
        .bind(subscription.active)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_subscription(&self, id: i64) -> Result<bool, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET deleted_at = $2, updated_at = $2
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_delivery(&self, delivery: &NewDelivery) -> Result<DeliveryRecord, StoreError> {
        let now = Utc::now();
        let row: DeliveryRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO webhook_deliveries
                (subscription_id, event, job_id, payload, delivered, attempt_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, FALSE, 0, $5, $5)
            RETURNING {DELIVERY_COLUMNS}
            "#
        ))
        .bind(delivery.subscription_id)
        .bind(delivery.event.as_str())
        .bind(&delivery.job_id)
        .bind(&delivery.payload)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn update_delivery(&self, delivery: &DeliveryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET delivered = $2, status_code = $3, response_body = $4,
                attempt_count = $5, next_retry_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.delivered)
        .bind(delivery.status_code)
        .bind(&delivery.response_body)
        .bind(delivery.attempt_count)
        .bind(delivery.next_retry_at)
        .bind(delivery.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_delivery(&self, id: i64) -> Result<Option<DeliveryRecord>, StoreError> {
        let row: Option<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeliveryRecord::try_from).transpose()
    }

    async fn list_deliveries(
        &self,
        subscription_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
            WHERE subscription_id = $1
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(subscription_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn deliveries_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries
            WHERE delivered = FALSE AND next_retry_at IS NOT NULL AND next_retry_at <= $1
            ORDER BY next_retry_at
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn create_api_key(&self, key: &NewApiKey) -> Result<ApiKeyRecord, StoreError> {
        let now = Utc::now();
        let row: ApiKeyRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO api_keys (name, key_hash, key_prefix, owner_id, active, rate_limit, expires_at, created_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7)
            RETURNING {API_KEY_COLUMNS}
            "#
        ))
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(&key.owner_id)
        .bind(key.rate_limit)
        .bind(key.expires_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_api_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<ApiKeyRecord>, StoreError> {
        let row: Option<ApiKeyRow> = sqlx::query_as(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = $1 AND deleted_at IS NULL"
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ApiKeyRecord::from))
    }

    async fn get_api_key(&self, id: i64) -> Result<Option<ApiKeyRecord>, StoreError> {
        let row: Option<ApiKeyRow> = sqlx::query_as(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ApiKeyRecord::from))
    }

    async fn list_api_keys(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, StoreError> {
        let rows: Vec<ApiKeyRow> = sqlx::query_as(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys \
             WHERE owner_id = $1 AND deleted_at IS NULL ORDER BY id"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ApiKeyRecord::from).collect())
    }

    async fn set_api_key_active(&self, id: i64, active: bool) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE api_keys SET active = $2 WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(active)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_api_key(&self, id: i64) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE api_keys SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_api_key(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
