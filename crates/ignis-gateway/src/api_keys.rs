// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! API key issuance and management.
//!
//! Only the SHA-256 digest of a key is stored. The raw key is returned once,
//! in the response to [`ApiKeyService::issue`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::models::{ApiKeyRecord, IssuedApiKey, NewApiKey};
use crate::persistence::{Store, StoreError};

/// Prefix of every raw key.
pub const RAW_KEY_PREFIX: &str = "ign_";

/// Characters of the raw key kept for identification.
pub const DISPLAY_PREFIX_LEN: usize = 16;

/// Maximum length of a key name.
pub const MAX_NAME_LEN: usize = 100;

/// API key management errors.
#[derive(Debug, Error)]
pub enum ApiKeyError {
    /// The request failed validation.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// No key with this id is visible to the caller.
    #[error("API key not found: {0}")]
    NotFound(i64),

    /// Storage failed.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Body of a key issuance request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiKeyRequest {
    /// Display name, 1 to 100 characters.
    pub name: String,
    /// Optional expiry; must be in the future.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Body of a key update.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateApiKeyRequest {
    /// Enable or disable the key.
    pub active: bool,
}

/// Issues, lists, toggles and revokes API keys.
pub struct ApiKeyService {
    store: Arc<dyn Store>,
    default_rate_limit: u32,
}

impl ApiKeyService {
    /// Create a service issuing keys with `default_rate_limit` requests per window.
    pub fn new(store: Arc<dyn Store>, default_rate_limit: u32) -> Self {
        Self {
            store,
            default_rate_limit,
        }
    }

    /// Generate, hash and store a new key for `owner_id`.
    pub async fn issue(
        &self,
        request: CreateApiKeyRequest,
        owner_id: &str,
    ) -> Result<IssuedApiKey, ApiKeyError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ApiKeyError::Validation("name is required".into()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(ApiKeyError::Validation(format!(
                "name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        if request.expires_at.is_some_and(|expires| expires <= Utc::now()) {
            return Err(ApiKeyError::Validation(
                "expires_at must be in the future".into(),
            ));
        }

        let raw_key = generate_raw_key();
        let key = self
            .store
            .create_api_key(&NewApiKey {
                name: name.to_string(),
                key_hash: hash_api_key(&raw_key),
                key_prefix: raw_key[..DISPLAY_PREFIX_LEN].to_string(),
                owner_id: owner_id.to_string(),
                rate_limit: i32::try_from(self.default_rate_limit).unwrap_or(i32::MAX),
                expires_at: request.expires_at,
            })
            .await?;

        info!(
            api_key_id = key.id,
            name = %key.name,
            owner_id = %owner_id,
            rate_limit = key.rate_limit,
            "API key created"
        );
        Ok(IssuedApiKey { key, raw_key })
    }

    /// All keys owned by `owner_id`.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<ApiKeyRecord>, ApiKeyError> {
        Ok(self.store.list_api_keys(owner_id).await?)
    }

    /// Fetch a key owned by `owner_id`.
    pub async fn get(&self, id: i64, owner_id: &str) -> Result<ApiKeyRecord, ApiKeyError> {
        match self.store.get_api_key(id).await? {
            Some(key) if key.owner_id == owner_id => Ok(key),
            _ => Err(ApiKeyError::NotFound(id)),
        }
    }

    /// Enable or disable a key.
    pub async fn set_active(
        &self,
        id: i64,
        owner_id: &str,
        active: bool,
    ) -> Result<ApiKeyRecord, ApiKeyError> {
        let mut key = self.get(id, owner_id).await?;
        if !self.store.set_api_key_active(id, active).await? {
            return Err(ApiKeyError::NotFound(id));
        }
        key.active = active;

        info!(api_key_id = id, owner_id = %owner_id, active, "API key updated");
        Ok(key)
    }

    /// Revoke a key. It stops authenticating immediately.
    pub async fn revoke(&self, id: i64, owner_id: &str) -> Result<(), ApiKeyError> {
        self.get(id, owner_id).await?;
        if !self.store.delete_api_key(id).await? {
            return Err(ApiKeyError::NotFound(id));
        }
        info!(api_key_id = id, owner_id = %owner_id, "API key deleted");
        Ok(())
    }
}

/// SHA-256 hex digest under which API keys are stored.
pub fn hash_api_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// `ign_` followed by 64 hex characters drawn from two v4 UUIDs.
fn generate_raw_key() -> String {
    format!(
        "{RAW_KEY_PREFIX}{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteStore;

    async fn service() -> ApiKeyService {
        let store = SqliteStore::in_memory().await.expect("in-memory store");
        ApiKeyService::new(Arc::new(store), 5)
    }

    fn request(name: &str) -> CreateApiKeyRequest {
        CreateApiKeyRequest {
            name: name.to_string(),
            expires_at: None,
        }
    }

    #[test]
    fn test_hash_api_key() {
        assert_eq!(
            hash_api_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_generated_key_shape() {
        let key = generate_raw_key();
        assert!(key.starts_with(RAW_KEY_PREFIX));
        assert_eq!(key.len(), RAW_KEY_PREFIX.len() + 64);
        assert!(key[RAW_KEY_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_raw_key());
    }

    #[tokio::test]
    async fn test_issue_stores_only_the_hash() {
        let service = service().await;
        let issued = service.issue(request("  ci  "), "user_1").await.unwrap();

        assert_eq!(issued.key.name, "ci");
        assert_eq!(issued.key.rate_limit, 5);
        assert!(issued.key.active);
        assert_eq!(issued.key.key_prefix, issued.raw_key[..DISPLAY_PREFIX_LEN]);
        assert_eq!(issued.key.key_hash, hash_api_key(&issued.raw_key));

        let found = service
            .store
            .find_api_key_by_hash(&hash_api_key(&issued.raw_key))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, issued.key.id);
    }

    #[tokio::test]
    async fn test_issue_validation() {
        let service = service().await;
        assert!(matches!(
            service.issue(request(" "), "user_1").await,
            Err(ApiKeyError::Validation(_))
        ));
        assert!(matches!(
            service.issue(request(&"n".repeat(MAX_NAME_LEN + 1)), "user_1").await,
            Err(ApiKeyError::Validation(_))
        ));
        let expired = CreateApiKeyRequest {
            name: "old".into(),
            expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
        };
        assert!(matches!(
            service.issue(expired, "user_1").await,
            Err(ApiKeyError::Validation(_))
        ));
        assert!(service.list("user_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_and_revoke_are_owner_scoped() {
        let service = service().await;
        let issued = service.issue(request("ci"), "user_1").await.unwrap();
        let id = issued.key.id;

        assert!(matches!(service.get(id, "user_2").await, Err(ApiKeyError::NotFound(_))));
        assert!(matches!(
            service.set_active(id, "user_2", false).await,
            Err(ApiKeyError::NotFound(_))
        ));
        assert!(matches!(service.revoke(id, "user_2").await, Err(ApiKeyError::NotFound(_))));

        let disabled = service.set_active(id, "user_1", false).await.unwrap();
        assert!(!disabled.active);
        assert!(!service.get(id, "user_1").await.unwrap().active);

        service.revoke(id, "user_1").await.unwrap();
        assert!(matches!(service.get(id, "user_1").await, Err(ApiKeyError::NotFound(_))));
        assert!(service.list("user_1").await.unwrap().is_empty());
    }
}
