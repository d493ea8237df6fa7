// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rate-limit key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest.
const FINGERPRINT_LEN: usize = 16;

/// Identifier used for the global scope.
pub const GLOBAL_IDENTIFIER: &str = "all";

/// Which identity a rate-limit key is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// An authenticated management user.
    User,
    /// A public API key.
    ApiKey,
    /// Every caller of an endpoint.
    Global,
}

impl Scope {
    /// Prefix used in derived keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::ApiKey => "api",
            Scope::Global => "global",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive a bounded-length key for `(scope, identifier, endpoint)`.
///
/// The result is `<scope>:<16 hex chars of sha256("scope:identifier:endpoint")>`,
/// so its length does not depend on the identifier or endpoint.
pub fn fingerprint(scope: Scope, identifier: &str, endpoint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", scope.as_str(), identifier, endpoint).as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}", scope.as_str(), &digest[..FINGERPRINT_LEN])
}

/// Key for an authenticated user on an endpoint.
pub fn user_key(user_id: &str, endpoint: &str) -> String {
    fingerprint(Scope::User, user_id, endpoint)
}

/// Key for an API key on an endpoint.
pub fn api_key_key(api_key_id: i64, endpoint: &str) -> String {
    fingerprint(Scope::ApiKey, &api_key_id.to_string(), endpoint)
}

/// Key shared by every caller of an endpoint.
pub fn global_key(endpoint: &str) -> String {
    fingerprint(Scope::Global, GLOBAL_IDENTIFIER, endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint(Scope::User, "user_123", "/api/v1/jobs");
        let b = fingerprint(Scope::User, "user_123", "/api/v1/jobs");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_shape() {
        let key = fingerprint(Scope::ApiKey, "42", "/public/v1/jobs");
        let (scope, hash) = key.split_once(':').unwrap();
        assert_eq!(scope, "api");
        assert_eq!(hash.len(), FINGERPRINT_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_different_endpoints_differ() {
        let jobs = user_key("user_123", "/api/v1/jobs");
        let job = user_key("user_123", "/api/v1/jobs/{job_id}");
        assert_ne!(jobs, job);
    }

    #[test]
    fn test_scopes_differ_for_same_identifier() {
        assert_ne!(
            fingerprint(Scope::User, "7", "/x"),
            fingerprint(Scope::ApiKey, "7", "/x")
        );
    }

    #[test]
    fn test_length_is_bounded() {
        let long_id = "x".repeat(10_000);
        let key = user_key(&long_id, "/api/v1/jobs");
        assert_eq!(key.len(), "user:".len() + FINGERPRINT_LEN);
    }

    #[test]
    fn test_global_key_uses_all() {
        assert_eq!(
            global_key("/health"),
            fingerprint(Scope::Global, GLOBAL_IDENTIFIER, "/health")
        );
    }
}
