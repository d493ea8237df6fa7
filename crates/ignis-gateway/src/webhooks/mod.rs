// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook delivery.
//!
//! - [`WebhookDispatcher`] looks up matching subscriptions and queues one
//!   [`DeliveryJob`] per subscription.
//! - [`DeliveryPool`] runs queued jobs behind a semaphore.
//! - [`WebhookSender`] signs, posts and retries, mutating one
//!   [`DeliveryRecord`](crate::models::DeliveryRecord) in place.
//! - [`DeliveryRetrySweeper`] makes the single deferred attempt.
//!
//! # Wire format
//!
//! `POST <url>` with `Content-Type: application/json`, `X-Webhook-Event`,
//! `X-Webhook-Delivery` (record id) and, when the subscription has a secret,
//! `X-Webhook-Signature: sha256=<hex>` over the exact body bytes.

pub mod dispatcher;
pub mod retry_sweeper;
pub mod sender;
pub mod signer;

pub use self::dispatcher::{DeliveryJob, DeliveryPool, WebhookDispatcher};
pub use self::retry_sweeper::{DeliveryRetrySweeper, RetrySweeperConfig};
pub use self::sender::{RetryPolicy, WebhookSender};

use thiserror::Error;

use crate::persistence::StoreError;

/// Webhook errors.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Reading or writing subscriptions or delivery records failed.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// The payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The signature could not be computed or encoded.
    #[error("Signing error: {0}")]
    Signing(String),

    /// The delivery pool is no longer accepting jobs.
    #[error("Delivery queue closed")]
    QueueClosed,
}
