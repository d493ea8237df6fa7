// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ignis-gateway.

use thiserror::Error;

/// Gateway errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Store(#[from] crate::persistence::StoreError),

    /// Admission control failed.
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] crate::rate_limit::RateLimitError),

    /// Webhook dispatch or delivery failed.
    #[error("Webhook error: {0}")]
    Webhook(#[from] crate::webhooks::WebhookError),

    /// Job bus operation failed.
    #[error("Bus error: {0}")]
    Bus(#[from] crate::bus::BusError),

    /// Job management failed.
    #[error("Job error: {0}")]
    Job(#[from] crate::jobs::JobError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The runtime builder was missing a required component.
    #[error("{0} is required")]
    MissingComponent(&'static str),

    /// A runtime task panicked.
    #[error("{0} task panicked: {1}")]
    TaskPanicked(&'static str, String),
}

/// Result type using the gateway [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
