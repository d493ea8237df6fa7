// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Route handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::AppState;
use super::context::RequestContext;
use super::error::ApiError;
use crate::api_keys::{CreateApiKeyRequest, UpdateApiKeyRequest};
use crate::jobs::CreateJobRequest;
use crate::models::{
    ApiKeyRecord, CallbackSubscription, DeliveryRecord, IssuedApiKey, Job, JobSnapshot,
};
use crate::subscriptions::{CreateSubscriptionRequest, UpdateSubscriptionRequest};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

/// `{"data": ...}` response envelope.
#[derive(Debug, Serialize)]
pub struct Data<T> {
    /// Response payload.
    pub data: T,
}

/// `{"message": ...}` response body.
#[derive(Debug, Serialize)]
pub struct Message {
    /// Human-readable outcome.
    pub message: String,
}

impl Message {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

/// Paging parameters for listings.
///
/// Parsed leniently: a limit that is not a number in 1 to 100 becomes 50,
/// an offset that is not a non-negative number becomes 0.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    /// Page size.
    pub limit: Option<String>,
    /// Records to skip.
    pub offset: Option<String>,
}

impl PageQuery {
    /// Effective `(limit, offset)`.
    pub fn resolve(&self) -> (i64, i64) {
        let limit = self
            .limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|limit| (1..=MAX_PAGE_SIZE).contains(limit))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = self
            .offset
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|offset| *offset >= 0)
            .unwrap_or(0);
        (limit, offset)
    }
}

/// Paging metadata of a public job listing.
#[derive(Debug, Serialize)]
pub struct Pagination {
    /// Jobs owned by the caller.
    pub total: usize,
    /// Effective page size.
    pub limit: i64,
    /// Effective offset.
    pub offset: i64,
    /// Jobs on this page.
    pub count: usize,
}

/// A page of public job snapshots.
#[derive(Debug, Serialize)]
pub struct JobPage {
    /// Snapshots, newest first.
    pub data: Vec<JobSnapshot>,
    /// Paging metadata.
    pub pagination: Pagination,
}

/// A page of delivery records.
#[derive(Debug, Serialize)]
pub struct DeliveryPage {
    /// Records, newest first.
    pub deliveries: Vec<DeliveryRecord>,
    /// Effective page size.
    pub limit: i64,
    /// Effective offset.
    pub offset: i64,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let strategy = state.admission.strategy_kind().as_str();
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "rate_limit_strategy": strategy })),
        ),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "rate_limit_strategy": strategy })),
            )
        }
    }
}

/// `POST /api/v1/jobs`
pub async fn create_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Data<Job>>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let job = state
        .jobs
        .create_job(request, &ctx.identity)
        .await
        .map_err(ApiError::management)?;
    Ok((StatusCode::CREATED, Json(Data { data: job })))
}

/// `GET /api/v1/jobs`
pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Data<Vec<Job>>>, ApiError> {
    let jobs = state
        .jobs
        .list_jobs(&ctx.identity)
        .await
        .map_err(ApiError::management)?;
    Ok(Json(Data { data: jobs }))
}

/// `GET /api/v1/jobs/{job_id}`
pub async fn get_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(job_id): Path<String>,
) -> Result<Json<Data<Job>>, ApiError> {
    let job = state
        .jobs
        .get_job(&job_id, &ctx.identity)
        .await
        .map_err(ApiError::management)?;
    Ok(Json(Data { data: job }))
}

/// `POST /api/v1/webhooks`
pub async fn create_webhook(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateSubscriptionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Data<CallbackSubscription>>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let subscription = state.subscriptions.create(request, &ctx.identity).await?;
    Ok((StatusCode::CREATED, Json(Data { data: subscription })))
}

/// `GET /api/v1/webhooks`
pub async fn list_webhooks(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Data<Vec<CallbackSubscription>>>, ApiError> {
    let subscriptions = state.subscriptions.list(&ctx.identity).await?;
    Ok(Json(Data { data: subscriptions }))
}

/// `GET /api/v1/webhooks/{id}`
pub async fn get_webhook(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<Json<Data<CallbackSubscription>>, ApiError> {
    let subscription = state.subscriptions.get(id, &ctx.identity).await?;
    Ok(Json(Data { data: subscription }))
}

/// `PATCH /api/v1/webhooks/{id}`
pub async fn update_webhook(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    payload: Result<Json<UpdateSubscriptionRequest>, JsonRejection>,
) -> Result<Json<Data<CallbackSubscription>>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let subscription = state.subscriptions.update(id, &ctx.identity, request).await?;
    Ok(Json(Data { data: subscription }))
}

/// `DELETE /api/v1/webhooks/{id}`
pub async fn delete_webhook(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<Json<Message>, ApiError> {
    state.subscriptions.delete(id, &ctx.identity).await?;
    Ok(Message::new("Webhook deleted successfully"))
}

/// `GET /api/v1/webhooks/{id}/deliveries`
///
/// Delivery audit trail for one of the caller's subscriptions.
pub async fn list_deliveries(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(subscription_id): Path<i64>,
    Query(page): Query<PageQuery>,
) -> Result<Json<DeliveryPage>, ApiError> {
    let (limit, offset) = page.resolve();
    let deliveries = state
        .subscriptions
        .deliveries(subscription_id, &ctx.identity, limit, offset)
        .await?;

    Ok(Json(DeliveryPage {
        deliveries,
        limit,
        offset,
    }))
}

/// `POST /api/v1/api-keys`
///
/// The raw key appears in this response only.
pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateApiKeyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Data<IssuedApiKey>>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let issued = state.api_keys.issue(request, &ctx.identity).await?;
    Ok((StatusCode::CREATED, Json(Data { data: issued })))
}

/// `GET /api/v1/api-keys`
pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Data<Vec<ApiKeyRecord>>>, ApiError> {
    let keys = state.api_keys.list(&ctx.identity).await?;
    Ok(Json(Data { data: keys }))
}

/// `GET /api/v1/api-keys/{id}`
pub async fn get_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<Json<Data<ApiKeyRecord>>, ApiError> {
    let key = state.api_keys.get(id, &ctx.identity).await?;
    Ok(Json(Data { data: key }))
}

/// `PATCH /api/v1/api-keys/{id}`
pub async fn update_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    payload: Result<Json<UpdateApiKeyRequest>, JsonRejection>,
) -> Result<Json<Data<ApiKeyRecord>>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let key = state
        .api_keys
        .set_active(id, &ctx.identity, request.active)
        .await?;
    Ok(Json(Data { data: key }))
}

/// `DELETE /api/v1/api-keys/{id}`
pub async fn delete_api_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> Result<Json<Message>, ApiError> {
    state.api_keys.revoke(id, &ctx.identity).await?;
    Ok(Message::new("API key deleted successfully"))
}

/// `GET /public/v1/status`
///
/// Unauthenticated service description.
pub async fn api_status() -> Json<serde_json::Value> {
    Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "Ignis Code Execution API",
        "description": "Submit code for execution and retrieve results",
        "endpoints": {
            "execute": "POST /public/v1/jobs",
            "status": "GET /public/v1/jobs/{job_id}",
            "jobs": "GET /public/v1/jobs",
        },
    }))
}

/// `POST /public/v1/jobs`
pub async fn public_create_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Data<JobSnapshot>>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let job = state
        .jobs
        .create_job(request, &ctx.identity)
        .await
        .map_err(ApiError::public)?;
    Ok((StatusCode::CREATED, Json(Data { data: job.snapshot() })))
}

/// `GET /public/v1/jobs/{job_id}`
pub async fn public_get_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(job_id): Path<String>,
) -> Result<Json<Data<JobSnapshot>>, ApiError> {
    let job = state
        .jobs
        .get_job(&job_id, &ctx.identity)
        .await
        .map_err(ApiError::public)?;
    Ok(Json(Data { data: job.snapshot() }))
}

/// `GET /public/v1/jobs`
pub async fn public_list_jobs(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(page): Query<PageQuery>,
) -> Result<Json<JobPage>, ApiError> {
    let (limit, offset) = page.resolve();
    let jobs = state
        .jobs
        .list_jobs(&ctx.identity)
        .await
        .map_err(ApiError::public)?;

    let total = jobs.len();
    let data: Vec<JobSnapshot> = jobs
        .iter()
        .skip(usize::try_from(offset).unwrap_or(usize::MAX))
        .take(usize::try_from(limit).unwrap_or(0))
        .map(Job::snapshot)
        .collect();

    Ok(Json(JobPage {
        pagination: Pagination {
            total,
            limit,
            offset,
            count: data.len(),
        },
        data,
    }))
}
