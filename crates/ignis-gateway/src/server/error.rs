// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error responses.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::api_keys::ApiKeyError;
use crate::jobs::JobError;
use crate::subscriptions::SubscriptionError;

/// Which API surface produced an error.
///
/// Internal error details are shown to trusted management callers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// `/api/v1/*`, callers authenticated by the identity provider.
    Management,
    /// `/public/v1/*`, callers authenticated by API key.
    Public,
}

/// Errors returned by handlers and auth middleware.
#[derive(Debug)]
pub enum ApiError {
    /// 400: the request was malformed.
    BadRequest(String),
    /// 401: missing or rejected credentials.
    Unauthorized(String),
    /// 404: the resource does not exist or is not visible to the caller.
    NotFound(String),
    /// 500: a storage, bus or backend failure.
    Internal {
        /// Surface the request arrived on.
        surface: Surface,
        /// Underlying error text.
        detail: String,
    },
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
}

impl ApiError {
    /// Internal failure on `surface`.
    pub fn internal(surface: Surface, err: impl fmt::Display) -> Self {
        ApiError::Internal {
            surface,
            detail: err.to_string(),
        }
    }

    /// Map a job error for a management caller.
    pub fn management(err: JobError) -> Self {
        Self::from_job(err, Surface::Management)
    }

    /// Map a job error for a public API caller.
    pub fn public(err: JobError) -> Self {
        Self::from_job(err, Surface::Public)
    }

    fn from_job(err: JobError, surface: Surface) -> Self {
        match err {
            JobError::Validation(message) => ApiError::BadRequest(message),
            JobError::NotFound(_) => ApiError::NotFound("Job not found".into()),
            other => ApiError::internal(surface, other),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SubscriptionError> for ApiError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::Validation(message) => ApiError::BadRequest(message),
            SubscriptionError::NotFound(_) => ApiError::NotFound("Webhook not found".into()),
            other => ApiError::internal(Surface::Management, other),
        }
    }
}

impl From<ApiKeyError> for ApiError {
    fn from(err: ApiKeyError) -> Self {
        match err {
            ApiKeyError::Validation(message) => ApiError::BadRequest(message),
            ApiKeyError::NotFound(_) => ApiError::NotFound("API key not found".into()),
            other => ApiError::internal(Surface::Management, other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(message)
            | ApiError::Unauthorized(message)
            | ApiError::NotFound(message) => message,
            ApiError::Internal { surface, detail } => {
                error!(surface = ?surface, error = %detail, "Request failed");
                match surface {
                    Surface::Management => detail,
                    Surface::Public => "Internal server error".to_string(),
                }
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
