// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HMAC-SHA256 signatures for outbound webhook bodies.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the `X-Webhook-Signature` header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Hex-encoded HMAC-SHA256 of `payload` keyed by `secret`.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Signing(e.to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Value for the `X-Webhook-Signature` header: `sha256=<hex>`.
pub fn signature_header(secret: &str, payload: &[u8]) -> Result<String, WebhookError> {
    Ok(format!("{SIGNATURE_PREFIX}{}", sign(secret, payload)?))
}

/// Check a received `sha256=<hex>` header against `payload`, in constant time.
pub fn verify(secret: &str, payload: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
