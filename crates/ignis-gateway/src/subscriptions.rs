// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Callback subscription management.
//!
//! Every operation is scoped to the owning identity: a subscription owned by
//! someone else is reported as not found.

use std::sync::Arc;

use chrono::Utc;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::models::{CallbackSubscription, DeliveryRecord, EventKind, NewSubscription};
use crate::persistence::{Store, StoreError};

/// Maximum length of a callback URL.
pub const MAX_URL_LEN: usize = 500;

/// Maximum length of a signing secret.
pub const MAX_SECRET_LEN: usize = 100;

/// Subscription management errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The request failed validation.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// No subscription with this id is visible to the caller.
    #[error("Webhook not found: {0}")]
    NotFound(i64),

    /// Storage failed.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Body of a subscription registration.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// Callback URL, `http` or `https`.
    pub url: String,
    /// Signing secret. Empty means unsigned deliveries.
    #[serde(default)]
    pub secret: Option<String>,
    /// Events to deliver, at least one.
    pub events: Vec<EventKind>,
}

/// Partial update of a subscription. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSubscriptionRequest {
    /// New callback URL.
    #[serde(default)]
    pub url: Option<String>,
    /// New signing secret. An empty string keeps the current one.
    #[serde(default)]
    pub secret: Option<String>,
    /// New event list, at least one.
    #[serde(default)]
    pub events: Option<Vec<EventKind>>,
    /// Enable or pause deliveries.
    #[serde(default)]
    pub active: Option<bool>,
}

/// Registers, edits and removes callback subscriptions.
pub struct SubscriptionService {
    store: Arc<dyn Store>,
}

impl SubscriptionService {
    /// Create a new subscription service.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Register an active subscription for `owner_id`.
    pub async fn create(
        &self,
        request: CreateSubscriptionRequest,
        owner_id: &str,
    ) -> Result<CallbackSubscription, SubscriptionError> {
        let url = validate_url(&request.url)?;
        let secret = validate_secret(request.secret)?;
        let events = validate_events(request.events)?;

        let subscription = self
            .store
            .create_subscription(&NewSubscription {
                owner_id: owner_id.to_string(),
                url,
                secret,
                events,
                active: true,
            })
            .await?;

        info!(
            subscription_id = subscription.id,
            url = %subscription.url,
            owner_id = %owner_id,
            "Webhook subscription created"
        );
        Ok(subscription)
    }

    /// All subscriptions owned by `owner_id`.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<CallbackSubscription>, SubscriptionError> {
        Ok(self.store.list_subscriptions(owner_id, None).await?)
    }

    /// Fetch a subscription owned by `owner_id`.
    pub async fn get(
        &self,
        id: i64,
        owner_id: &str,
    ) -> Result<CallbackSubscription, SubscriptionError> {
        match self.store.get_subscription(id).await? {
            Some(subscription) if subscription.owner_id == owner_id => Ok(subscription),
            _ => Err(SubscriptionError::NotFound(id)),
        }
    }

    /// Apply a partial update.
    pub async fn update(
        &self,
        id: i64,
        owner_id: &str,
        request: UpdateSubscriptionRequest,
    ) -> Result<CallbackSubscription, SubscriptionError> {
        let mut subscription = self.get(id, owner_id).await?;

        if let Some(url) = request.url {
            subscription.url = validate_url(&url)?;
        }
        if let Some(secret) = validate_secret(request.secret)? {
            subscription.secret = Some(secret);
        }
        if let Some(events) = request.events {
            subscription.events = validate_events(events)?;
        }
        if let Some(active) = request.active {
            subscription.active = active;
        }
        subscription.updated_at = Utc::now();

        if !self.store.update_subscription(&subscription).await? {
            return Err(SubscriptionError::NotFound(id));
        }

        info!(subscription_id = id, owner_id = %owner_id, "Webhook subscription updated");
        Ok(subscription)
    }

    /// Soft-delete a subscription. Its delivery records are kept.
    pub async fn delete(&self, id: i64, owner_id: &str) -> Result<(), SubscriptionError> {
        self.get(id, owner_id).await?;
        if !self.store.delete_subscription(id).await? {
            return Err(SubscriptionError::NotFound(id));
        }
        info!(subscription_id = id, owner_id = %owner_id, "Webhook subscription deleted");
        Ok(())
    }

    /// Delivery audit trail of a subscription, newest first.
    pub async fn deliveries(
        &self,
        id: i64,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DeliveryRecord>, SubscriptionError> {
        self.get(id, owner_id).await?;
        Ok(self.store.list_deliveries(id, limit, offset).await?)
    }
}

fn validate_url(raw: &str) -> Result<String, SubscriptionError> {
    let url = raw.trim();
    if url.chars().count() > MAX_URL_LEN {
        return Err(SubscriptionError::Validation(format!(
            "url must be at most {MAX_URL_LEN} characters"
        )));
    }

    let parsed = Url::parse(url)
        .map_err(|e| SubscriptionError::Validation(format!("url is invalid: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(SubscriptionError::Validation(
            "url must be an http or https URL".into(),
        ));
    }
    Ok(url.to_string())
}

fn validate_secret(secret: Option<String>) -> Result<Option<String>, SubscriptionError> {
    match secret {
        Some(secret) if secret.chars().count() > MAX_SECRET_LEN => Err(
            SubscriptionError::Validation(format!(
                "secret must be at most {MAX_SECRET_LEN} characters"
            )),
        ),
        Some(secret) if !secret.is_empty() => Ok(Some(secret)),
        _ => Ok(None),
    }
}

fn validate_events(events: Vec<EventKind>) -> Result<Vec<EventKind>, SubscriptionError> {
    let mut unique = Vec::with_capacity(events.len());
    for event in events {
        if !unique.contains(&event) {
            unique.push(event);
        }
    }
    if unique.is_empty() {
        return Err(SubscriptionError::Validation(
            "at least one event is required".into(),
        ));
    }
    Ok(unique)
}
