// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface tests driven through the router with `oneshot`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{RecordingBus, fast_policy, issue_api_key, memory_store, payload, subscribe};
use ignis_gateway::api_keys::hash_api_key;
use ignis_gateway::config::RateLimitSettings;
use ignis_gateway::jobs::JobService;
use ignis_gateway::models::{EventKind, NewApiKey};
use ignis_gateway::persistence::Store;
use ignis_gateway::rate_limit::AdmissionControl;
use ignis_gateway::server::{AppState, router};
use ignis_gateway::webhooks::{WebhookDispatcher, WebhookSender};

struct TestApp {
    app: Router,
    store: Arc<dyn Store>,
    bus: Arc<RecordingBus>,
}

async fn test_app(limits: RateLimitSettings) -> TestApp {
    let store = memory_store().await;
    let bus = Arc::new(RecordingBus::default());
    let sender = WebhookSender::new(store.clone(), Duration::from_secs(5), fast_policy()).unwrap();
    let (dispatcher, _pool) = WebhookDispatcher::new(store.clone(), sender, 1, 8);
    let jobs = Arc::new(JobService::new(store.clone(), bus.clone(), dispatcher));

    let app = router(AppState::new(
        jobs,
        store.clone(),
        Arc::new(AdmissionControl::local()),
        limits,
    ));
    TestApp { app, store, bus }
}

fn generous() -> RateLimitSettings {
    RateLimitSettings {
        window: Duration::from_secs(60),
        user_limit: 100,
        global_limit: 1000,
        api_key_limit: 5,
    }
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn user_get(uri: &str, user: &str) -> Request<Body> {
    Request::get(uri)
        .header("x-authenticated-user", user)
        .body(Body::empty())
        .unwrap()
}

fn user_post(uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("x-authenticated-user", user)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn user_patch(uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::patch(uri)
        .header("x-authenticated-user", user)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn user_delete(uri: &str, user: &str) -> Request<Body> {
    Request::delete(uri)
        .header("x-authenticated-user", user)
        .body(Body::empty())
        .unwrap()
}

fn key_get(uri: &str, key: &str) -> Request<Body> {
    Request::get(uri)
        .header("x-api-key", key)
        .body(Body::empty())
        .unwrap()
}

fn key_post(uri: &str, key: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("x-api-key", key)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn job_body() -> Value {
    json!({ "language": "python", "code": "print(1)" })
}

// ============================================================================
// Health and global limit
// ============================================================================

#[tokio::test]
async fn test_health() {
    let t = test_app(generous()).await;
    let response = send(&t.app, Request::get("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-global-limit"], "1000");
    assert_eq!(response.headers()["x-ratelimit-global-window"], "60s");
    assert!(response.headers().contains_key("x-ratelimit-global-reset"));

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["rate_limit_strategy"], "local");
}

#[tokio::test]
async fn test_global_limit_denies_with_429() {
    let t = test_app(RateLimitSettings {
        global_limit: 1,
        ..generous()
    })
    .await;

    let first = send(&t.app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = send(&t.app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.headers()["x-ratelimit-global-remaining"], "0");

    let body = json_body(second).await;
    assert_eq!(body["error"], "Global rate limit exceeded");
    assert_eq!(body["rate_limit"]["limit"], 1);
    assert_eq!(body["rate_limit"]["window"], "60s");
}

#[tokio::test]
async fn test_empty_window_denies_instead_of_admitting() {
    let t = test_app(RateLimitSettings {
        window: Duration::ZERO,
        ..generous()
    })
    .await;

    let response = send(&t.app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-global-remaining"], "0");
}

// ============================================================================
// Management surface
// ============================================================================

#[tokio::test]
async fn test_management_requires_identity() {
    let t = test_app(generous()).await;
    let response = send(&t.app, Request::get("/api/v1/jobs").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_management_job_lifecycle() {
    let t = test_app(generous()).await;

    let response = send(&t.app, user_post("/api/v1/jobs", "user_1", job_body())).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-ratelimit-limit"], "100");
    let created = json_body(response).await;
    let job_id = created["data"]["job_id"].as_str().unwrap().to_string();
    assert_eq!(created["data"]["status"], "received");
    assert_eq!(t.bus.published().len(), 1);

    let response = send(&t.app, user_get("/api/v1/jobs", "user_1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = json_body(response).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let uri = format!("/api/v1/jobs/{job_id}");
    let response = send(&t.app, user_get(&uri, "user_1")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&t.app, user_get(&uri, "user_2")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_management_validation_errors() {
    let t = test_app(generous()).await;

    let response = send(
        &t.app,
        user_post("/api/v1/jobs", "user_1", json!({ "language": "", "code": "x" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("language"));

    let request = Request::post("/api/v1/jobs")
        .header("x-authenticated-user", "user_1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = send(&t.app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(t.bus.published().is_empty());
}

#[tokio::test]
async fn test_user_limit_denies_with_429() {
    let t = test_app(RateLimitSettings {
        user_limit: 2,
        ..generous()
    })
    .await;

    for _ in 0..2 {
        let response = send(&t.app, user_get("/api/v1/jobs", "user_1")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&t.app, user_get("/api/v1/jobs", "user_1")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let body = json_body(response).await;
    assert_eq!(body["error"], "Rate limit exceeded");
    assert_eq!(body["rate_limit"]["limit"], 2);

    // Another identity has its own budget.
    let response = send(&t.app, user_get("/api/v1/jobs", "user_2")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_delivery_listing_is_owner_checked() {
    let t = test_app(generous()).await;
    let sub = subscribe(&t.store, "user_1", "http://127.0.0.1:1/hook", None, vec![EventKind::JobCompleted]).await;

    let body = serde_json::to_string(&payload(EventKind::JobCompleted, "job-1")).unwrap();
    for _ in 0..3 {
        t.store
            .create_delivery(&ignis_gateway::models::NewDelivery {
                subscription_id: sub.id,
                event: EventKind::JobCompleted,
                job_id: "job-1".into(),
                payload: body.clone(),
            })
            .await
            .unwrap();
    }

    let uri = format!("/api/v1/webhooks/{}/deliveries?limit=2", sub.id);
    let response = send(&t.app, user_get(&uri, "user_1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = json_body(response).await;
    assert_eq!(page["limit"], 2);
    assert_eq!(page["offset"], 0);
    assert_eq!(page["deliveries"].as_array().unwrap().len(), 2);

    let uri = format!("/api/v1/webhooks/{}/deliveries?offset=2", sub.id);
    let page = json_body(send(&t.app, user_get(&uri, "user_1")).await).await;
    assert_eq!(page["deliveries"].as_array().unwrap().len(), 1);

    let uri = format!("/api/v1/webhooks/{}/deliveries", sub.id);
    let response = send(&t.app, user_get(&uri, "user_2")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Public surface
// ============================================================================

#[tokio::test]
async fn test_public_requires_valid_key() {
    let t = test_app(generous()).await;

    let request = Request::post("/public/v1/jobs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(job_body().to_string()))
        .unwrap();
    assert_eq!(send(&t.app, request).await.status(), StatusCode::UNAUTHORIZED);

    let response = send(&t.app, key_post("/public/v1/jobs", "ign_unknown", job_body())).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(t.bus.published().is_empty());
}

#[tokio::test]
async fn test_public_rejects_expired_key() {
    let t = test_app(generous()).await;
    let raw_key = "ign_expired_key";
    t.store
        .create_api_key(&NewApiKey {
            name: "old".into(),
            key_hash: hash_api_key(raw_key),
            key_prefix: "ign_expi".into(),
            owner_id: "user_1".into(),
            rate_limit: 10,
            expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
        })
        .await
        .unwrap();

    let response = send(&t.app, key_post("/public/v1/jobs", raw_key, job_body())).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_public_job_with_bearer_key() {
    let t = test_app(generous()).await;
    let raw_key = issue_api_key(&t.store, "user_1", 10).await;

    let response = send(&t.app, key_post("/public/v1/jobs", &raw_key, job_body())).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-ratelimit-limit"], "10");
    let created = json_body(response).await;
    let job_id = created["data"]["job_id"].as_str().unwrap().to_string();
    assert!(created["data"].get("owner_id").is_none());

    let request = Request::get(format!("/public/v1/jobs/{job_id}"))
        .header(header::AUTHORIZATION, format!("Bearer {raw_key}"))
        .body(Body::empty())
        .unwrap();
    let response = send(&t.app, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["job_id"], job_id);

    let key = t
        .store
        .find_api_key_by_hash(&hash_api_key(&raw_key))
        .await
        .unwrap()
        .unwrap();
    assert!(key.last_used_at.is_some());
}

#[tokio::test]
async fn test_api_key_limit_uses_key_quota() {
    let t = test_app(generous()).await;
    let raw_key = issue_api_key(&t.store, "user_1", 1).await;

    let first = send(&t.app, key_post("/public/v1/jobs", &raw_key, job_body())).await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = send(&t.app, key_post("/public/v1/jobs", &raw_key, job_body())).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(second).await;
    assert_eq!(body["rate_limit"]["limit"], 1);
    assert_eq!(t.bus.published().len(), 1);
}

#[tokio::test]
async fn test_key_with_zero_quota_is_denied() {
    let t = test_app(generous()).await;
    let raw_key = issue_api_key(&t.store, "user_1", 0).await;

    let response = send(&t.app, key_post("/public/v1/jobs", &raw_key, job_body())).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let body = json_body(response).await;
    assert_eq!(body["error"], "Rate limit exceeded");
    assert_eq!(body["rate_limit"]["limit"], 0);
    assert!(t.bus.published().is_empty());

    // A negative stored limit is treated the same way.
    let raw_key = issue_api_key(&t.store, "user_1", -3).await;
    let response = send(&t.app, key_post("/public/v1/jobs", &raw_key, job_body())).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(t.bus.published().is_empty());
}

#[tokio::test]
async fn test_public_job_listing_pages_leniently() {
    let t = test_app(generous()).await;
    let raw_key = issue_api_key(&t.store, "user_1", 100).await;
    for _ in 0..3 {
        let response = send(&t.app, key_post("/public/v1/jobs", &raw_key, job_body())).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    // Jobs of another owner are not listed.
    send(&t.app, user_post("/api/v1/jobs", "user_2", job_body())).await;

    let page = json_body(send(&t.app, key_get("/public/v1/jobs?limit=2", &raw_key)).await).await;
    assert_eq!(page["pagination"]["total"], 3);
    assert_eq!(page["pagination"]["limit"], 2);
    assert_eq!(page["pagination"]["offset"], 0);
    assert_eq!(page["pagination"]["count"], 2);
    assert!(page["data"][0].get("owner_id").is_none());

    let page = json_body(send(&t.app, key_get("/public/v1/jobs?offset=2", &raw_key)).await).await;
    assert_eq!(page["pagination"]["count"], 1);

    let response = send(&t.app, key_get("/public/v1/jobs?limit=abc&offset=-1", &raw_key)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = json_body(response).await;
    assert_eq!(page["pagination"]["limit"], 50);
    assert_eq!(page["pagination"]["offset"], 0);
    assert_eq!(page["pagination"]["count"], 3);

    let page = json_body(send(&t.app, key_get("/public/v1/jobs?limit=500", &raw_key)).await).await;
    assert_eq!(page["pagination"]["limit"], 50);
}

#[tokio::test]
async fn test_delivery_listing_ignores_malformed_paging() {
    let t = test_app(generous()).await;
    let sub = subscribe(&t.store, "user_1", "http://127.0.0.1:1/hook", None, vec![EventKind::JobCompleted]).await;

    let uri = format!("/api/v1/webhooks/{}/deliveries?limit=ten&offset=x", sub.id);
    let response = send(&t.app, user_get(&uri, "user_1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = json_body(response).await;
    assert_eq!(page["limit"], 50);
    assert_eq!(page["offset"], 0);
}

#[tokio::test]
async fn test_status_needs_no_key() {
    let t = test_app(generous()).await;

    let response = send(&t.app, Request::get("/public/v1/status").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-ratelimit-global-limit"));
    let body = json_body(response).await;
    assert_eq!(body["status"], "operational");
    assert_eq!(body["service"], "Ignis Code Execution API");
}

// ============================================================================
// Webhook and API key management
// ============================================================================

#[tokio::test]
async fn test_webhook_management_lifecycle() {
    let t = test_app(generous()).await;

    let response = send(
        &t.app,
        user_post(
            "/api/v1/webhooks",
            "user_1",
            json!({ "url": "https://example.com/hook", "secret": "s3cret", "events": ["job.completed"] }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    let id = created["data"]["id"].as_i64().unwrap();
    assert_eq!(created["data"]["active"], true);
    assert!(created["data"].get("secret").is_none());

    let listed = json_body(send(&t.app, user_get("/api/v1/webhooks", "user_1")).await).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    let listed = json_body(send(&t.app, user_get("/api/v1/webhooks", "user_2")).await).await;
    assert!(listed["data"].as_array().unwrap().is_empty());

    let uri = format!("/api/v1/webhooks/{id}");
    assert_eq!(send(&t.app, user_get(&uri, "user_1")).await.status(), StatusCode::OK);
    assert_eq!(send(&t.app, user_get(&uri, "user_2")).await.status(), StatusCode::NOT_FOUND);

    let response = send(
        &t.app,
        user_patch(&uri, "user_1", json!({ "events": ["job.completed", "job.failed"], "active": false })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = json_body(response).await;
    assert_eq!(updated["data"]["active"], false);
    assert_eq!(updated["data"]["events"].as_array().unwrap().len(), 2);

    let stored = t.store.get_subscription(id).await.unwrap().unwrap();
    assert_eq!(stored.secret.as_deref(), Some("s3cret"));
    assert!(!stored.active);

    let response = send(&t.app, user_patch(&uri, "user_1", json!({ "url": "ftp://example.com" }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(send(&t.app, user_delete(&uri, "user_2")).await.status(), StatusCode::NOT_FOUND);
    let response = send(&t.app, user_delete(&uri, "user_1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["message"], "Webhook deleted successfully");
    assert_eq!(send(&t.app, user_get(&uri, "user_1")).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_registration_validation() {
    let t = test_app(generous()).await;

    for body in [
        json!({ "url": "not a url", "events": ["job.completed"] }),
        json!({ "url": "https://example.com/hook", "events": [] }),
        json!({ "url": "https://example.com/hook", "events": ["job.started"] }),
    ] {
        let response = send(&t.app, user_post("/api/v1/webhooks", "user_1", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
    assert!(t.store.list_subscriptions("user_1", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_issued_api_key_authenticates_until_disabled() {
    let t = test_app(generous()).await;

    let response = send(&t.app, user_post("/api/v1/api-keys", "user_1", json!({ "name": "ci" }))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let issued = json_body(response).await;
    let id = issued["data"]["id"].as_i64().unwrap();
    let raw_key = issued["data"]["raw_key"].as_str().unwrap().to_string();
    assert!(raw_key.starts_with("ign_"));
    assert_eq!(issued["data"]["rate_limit"], 5);
    assert!(issued["data"].get("key_hash").is_none());

    let listed = json_body(send(&t.app, user_get("/api/v1/api-keys", "user_1")).await).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    assert!(listed["data"][0].get("raw_key").is_none());

    let response = send(&t.app, key_post("/public/v1/jobs", &raw_key, job_body())).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-ratelimit-limit"], "5");

    let uri = format!("/api/v1/api-keys/{id}");
    assert_eq!(
        send(&t.app, user_patch(&uri, "user_2", json!({ "active": false }))).await.status(),
        StatusCode::NOT_FOUND
    );
    let response = send(&t.app, user_patch(&uri, "user_1", json!({ "active": false }))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["active"], false);

    let response = send(&t.app, key_post("/public/v1/jobs", &raw_key, job_body())).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    send(&t.app, user_patch(&uri, "user_1", json!({ "active": true }))).await;
    let response = send(&t.app, key_get("/public/v1/jobs", &raw_key)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&t.app, user_delete(&uri, "user_1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["message"], "API key deleted successfully");

    let response = send(&t.app, key_get("/public/v1/jobs", &raw_key)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(send(&t.app, user_get(&uri, "user_1")).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_api_key_issuance_validation() {
    let t = test_app(generous()).await;

    let response = send(&t.app, user_post("/api/v1/api-keys", "user_1", json!({ "name": "" }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let past = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
    let response = send(
        &t.app,
        user_post("/api/v1/api-keys", "user_1", json!({ "name": "old", "expires_at": past })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&t.app, Request::post("/api/v1/api-keys")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "name": "ci" }).to_string()))
        .unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
