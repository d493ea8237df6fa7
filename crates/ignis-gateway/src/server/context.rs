// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authentication middleware and the typed per-request context it produces.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::{debug, warn};

use super::AppState;
use super::error::{ApiError, Surface};
use crate::api_keys::hash_api_key;

/// Identity header set by the upstream identity provider.
pub const USER_HEADER: &str = "x-authenticated-user";

/// Header carrying a raw API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// How the caller authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthKind {
    /// Trusted identity forwarded by the identity provider.
    User,
    /// API key, carrying the key's own request limit.
    ApiKey {
        /// Key record id.
        key_id: i64,
        /// Requests per window granted to the key.
        rate_limit: u32,
    },
}

/// Authenticated caller, inserted into request extensions once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Owner identity used for scoping reads and writes.
    pub identity: String,
    /// Authentication method.
    pub auth: AuthKind,
}

/// Require the identity-provider header on management routes.
pub async fn require_user(mut request: Request, next: Next) -> Response {
    let identity = request
        .headers()
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let Some(identity) = identity else {
        return ApiError::Unauthorized("Authentication required".into()).into_response();
    };

    request.extensions_mut().insert(RequestContext {
        identity,
        auth: AuthKind::User,
    });
    next.run(request).await
}

/// Require a valid API key on public routes.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(raw_key) = presented_key(request.headers()) else {
        return ApiError::Unauthorized("API key is required".into()).into_response();
    };

    let record = match state.store.find_api_key_by_hash(&hash_api_key(&raw_key)).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!("Unknown API key presented");
            return ApiError::Unauthorized("Invalid or expired API key".into()).into_response();
        }
        Err(e) => return ApiError::internal(Surface::Public, e).into_response(),
    };

    let now = Utc::now();
    if !record.can_use(now) {
        warn!(api_key_id = record.id, "Inactive or expired API key presented");
        return ApiError::Unauthorized("Invalid or expired API key".into()).into_response();
    }

    if let Err(e) = state.store.touch_api_key(record.id, now).await {
        warn!(api_key_id = record.id, error = %e, "Failed to record API key use");
    }

    debug!(api_key_id = record.id, owner_id = %record.owner_id, "API key authenticated");
    request.extensions_mut().insert(RequestContext {
        identity: record.owner_id,
        auth: AuthKind::ApiKey {
            key_id: record.id,
            rate_limit: u32::try_from(record.rate_limit).unwrap_or(0),
        },
    });
    next.run(request).await
}

fn presented_key(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let from_bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    from_header.or_else(from_bearer).map(str::to_string)
}
