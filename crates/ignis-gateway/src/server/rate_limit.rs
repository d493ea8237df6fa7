// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Admission middleware.
//!
//! Two layers run on every route: a global per-endpoint limit and, once the
//! caller is known, a per-identity limit. Both add `X-RateLimit*` headers and
//! answer 429 on denial. A quota of zero requests or an empty window denies
//! every request; any other limiter error lets the request through.

use std::time::Duration;

use axum::Json;
use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

use super::AppState;
use super::context::{AuthKind, RequestContext};
use crate::rate_limit::{RateLimitDecision, RateLimitError, api_key_key, global_key, user_key};

struct HeaderSet {
    limit: HeaderName,
    window: HeaderName,
    remaining: HeaderName,
    reset: HeaderName,
}

impl HeaderSet {
    fn global() -> Self {
        Self {
            limit: HeaderName::from_static("x-ratelimit-global-limit"),
            window: HeaderName::from_static("x-ratelimit-global-window"),
            remaining: HeaderName::from_static("x-ratelimit-global-remaining"),
            reset: HeaderName::from_static("x-ratelimit-global-reset"),
        }
    }

    fn identity() -> Self {
        Self {
            limit: HeaderName::from_static("x-ratelimit-limit"),
            window: HeaderName::from_static("x-ratelimit-window"),
            remaining: HeaderName::from_static("x-ratelimit-remaining"),
            reset: HeaderName::from_static("x-ratelimit-reset"),
        }
    }

    fn apply(&self, headers: &mut HeaderMap, decision: &RateLimitDecision) {
        let remaining = if decision.allowed { decision.remaining } else { 0 };
        let values = [
            (&self.limit, decision.limit.to_string()),
            (&self.window, format_window(decision.window)),
            (&self.remaining, remaining.to_string()),
            (&self.reset, decision.reset_at.timestamp().to_string()),
        ];
        for (name, value) in values {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name.clone(), value);
            }
        }
    }
}

/// Per-endpoint limit shared by every caller.
pub async fn global_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let key = global_key(&endpoint_of(&request));
    let limits = &state.limits;
    admit(
        &state,
        &key,
        limits.global_limit,
        HeaderSet::global(),
        "Global rate limit exceeded",
        request,
        next,
    )
    .await
}

/// Per-identity limit: the configured user limit, or the API key's own limit.
///
/// Must run after authentication so the [`RequestContext`] is present.
pub async fn identity_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let endpoint = endpoint_of(&request);
    let (key, limit) = match request.extensions().get::<RequestContext>() {
        Some(RequestContext {
            auth: AuthKind::ApiKey { key_id, rate_limit },
            ..
        }) => (api_key_key(*key_id, &endpoint), *rate_limit),
        Some(ctx) => (user_key(&ctx.identity, &endpoint), state.limits.user_limit),
        None => (global_key(&endpoint), state.limits.user_limit),
    };

    admit(
        &state,
        &key,
        limit,
        HeaderSet::identity(),
        "Rate limit exceeded",
        request,
        next,
    )
    .await
}

async fn admit(
    state: &AppState,
    key: &str,
    limit: u32,
    headers: HeaderSet,
    denial: &'static str,
    request: Request,
    next: Next,
) -> Response {
    let window = state.limits.window;
    let decision = match state.admission.allow(key, limit, window).await {
        Ok(decision) => decision,
        Err(RateLimitError::InvalidQuota { .. }) => {
            warn!(key = %key, limit, window = ?window, "Quota admits no requests, denying");
            RateLimitDecision::denied(limit, window, state.admission.strategy_kind())
        }
        Err(e) => {
            error!(error = %e, key = %key, "Rate limiter error, admitting request");
            return next.run(request).await;
        }
    };

    if !decision.allowed {
        let body = json!({
            "error": denial,
            "rate_limit": {
                "limit": limit,
                "window": format_window(window),
            },
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        headers.apply(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    headers.apply(response.headers_mut(), &decision);
    response
}

fn endpoint_of(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

fn format_window(window: Duration) -> String {
    if window.subsec_millis() == 0 {
        format!("{}s", window.as_secs())
    } else {
        format!("{}ms", window.as_millis())
    }
}
