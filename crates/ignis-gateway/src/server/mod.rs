// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface.
//!
//! | Prefix | Authentication | Identity limit |
//! |--------|----------------|----------------|
//! | `/api/v1` | `X-Authenticated-User` header | configured user limit |
//! | `/public/v1` | `X-API-Key` or `Authorization: Bearer` | the key's own limit |
//!
//! Every route, `/health` and `/public/v1/status` included, also passes the
//! global per-endpoint limit.

pub mod context;
pub mod error;
pub mod handlers;
pub mod rate_limit;

use std::sync::Arc;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api_keys::ApiKeyService;
use crate::config::RateLimitSettings;
use crate::jobs::JobService;
use crate::persistence::Store;
use crate::rate_limit::AdmissionControl;
use crate::subscriptions::SubscriptionService;

pub use self::context::{AuthKind, RequestContext};
pub use self::error::{ApiError, Surface};

/// Shared state for handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    /// Job management.
    pub jobs: Arc<JobService>,
    /// Callback subscription management.
    pub subscriptions: Arc<SubscriptionService>,
    /// API key management.
    pub api_keys: Arc<ApiKeyService>,
    /// Record store.
    pub store: Arc<dyn Store>,
    /// Request gate.
    pub admission: Arc<AdmissionControl>,
    /// Limits applied by the admission middleware.
    pub limits: RateLimitSettings,
}

impl AppState {
    /// Wire the management services over `store`.
    pub fn new(
        jobs: Arc<JobService>,
        store: Arc<dyn Store>,
        admission: Arc<AdmissionControl>,
        limits: RateLimitSettings,
    ) -> Self {
        Self {
            jobs,
            subscriptions: Arc::new(SubscriptionService::new(store.clone())),
            api_keys: Arc::new(ApiKeyService::new(store.clone(), limits.api_key_limit)),
            store,
            admission,
            limits,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let management = Router::new()
        .route("/jobs", post(handlers::create_job).get(handlers::list_jobs))
        .route("/jobs/{job_id}", get(handlers::get_job))
        .route(
            "/webhooks",
            post(handlers::create_webhook).get(handlers::list_webhooks),
        )
        .route(
            "/webhooks/{id}",
            get(handlers::get_webhook)
                .patch(handlers::update_webhook)
                .delete(handlers::delete_webhook),
        )
        .route("/webhooks/{id}/deliveries", get(handlers::list_deliveries))
        .route(
            "/api-keys",
            post(handlers::create_api_key).get(handlers::list_api_keys),
        )
        .route(
            "/api-keys/{id}",
            get(handlers::get_api_key)
                .patch(handlers::update_api_key)
                .delete(handlers::delete_api_key),
        )
        .route_layer(from_fn_with_state(state.clone(), rate_limit::identity_rate_limit))
        .route_layer(from_fn(context::require_user));

    let public = Router::new()
        .route(
            "/jobs",
            post(handlers::public_create_job).get(handlers::public_list_jobs),
        )
        .route("/jobs/{job_id}", get(handlers::public_get_job))
        .route_layer(from_fn_with_state(state.clone(), rate_limit::identity_rate_limit))
        .route_layer(from_fn_with_state(state.clone(), context::require_api_key));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", management)
        .route("/public/v1/status", get(handlers::api_status))
        .nest("/public/v1", public)
        .route_layer(from_fn_with_state(state.clone(), rate_limit::global_rate_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` is notified.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: Arc<Notify>,
) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await
}
