// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job service tests: submission, worker status updates and event dispatch.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{RecordingBus, fast_policy, memory_store, subscribe, wait_for_deliveries};
use ignis_gateway::jobs::{CreateJobRequest, JobError, JobService};
use ignis_gateway::models::{EventKind, JobStatus, StatusUpdate};
use ignis_gateway::persistence::Store;
use ignis_gateway::webhooks::{WebhookDispatcher, WebhookSender};

struct Harness {
    store: Arc<dyn Store>,
    bus: Arc<RecordingBus>,
    jobs: JobService,
    pool_shutdown: Arc<Notify>,
    pool_handle: JoinHandle<()>,
}

impl Harness {
    async fn new() -> Self {
        let store = memory_store().await;
        let bus = Arc::new(RecordingBus::default());
        let sender = WebhookSender::new(store.clone(), Duration::from_secs(5), fast_policy()).unwrap();
        let (dispatcher, pool) = WebhookDispatcher::new(store.clone(), sender, 4, 16);
        let pool_shutdown = pool.shutdown_handle();
        let pool_handle = tokio::spawn(pool.run());
        let jobs = JobService::new(store.clone(), bus.clone(), dispatcher);
        Self {
            store,
            bus,
            jobs,
            pool_shutdown,
            pool_handle,
        }
    }

    async fn stop(self) {
        self.pool_shutdown.notify_one();
        self.pool_handle.await.unwrap();
    }
}

fn request(language: &str, code: &str) -> CreateJobRequest {
    CreateJobRequest {
        language: language.to_string(),
        code: code.to_string(),
    }
}

fn update(job_id: &str, status: &str) -> StatusUpdate {
    StatusUpdate {
        id: job_id.to_string(),
        status: status.to_string(),
        ..StatusUpdate::default()
    }
}

#[tokio::test]
async fn test_create_job_persists_and_publishes() {
    let h = Harness::new().await;

    let job = h
        .jobs
        .create_job(request("  python ", "print(1)\n"), "user_1")
        .await
        .unwrap();

    assert_eq!(job.language, "python");
    assert_eq!(job.code, "print(1)");
    assert_eq!(job.status, JobStatus::Received);
    assert_eq!(job.owner_id, "user_1");

    let published = h.bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].id, job.job_id);
    assert_eq!(published[0].language, "python");

    let fetched = h.jobs.get_job(&job.job_id, "user_1").await.unwrap();
    assert_eq!(fetched.job_id, job.job_id);
    h.stop().await;
}

#[tokio::test]
async fn test_create_job_validation() {
    let h = Harness::new().await;

    for req in [
        request("", "print(1)"),
        request("   ", "print(1)"),
        request("python", "  "),
        request(&"x".repeat(51), "print(1)"),
    ] {
        let err = h.jobs.create_job(req, "user_1").await.unwrap_err();
        assert!(matches!(err, JobError::Validation(_)), "unexpected {err:?}");
    }

    assert!(h.jobs.create_job(request(&"x".repeat(50), "1"), "user_1").await.is_ok());
    assert_eq!(h.bus.published().len(), 1);
    h.stop().await;
}

#[tokio::test]
async fn test_jobs_are_owner_scoped() {
    let h = Harness::new().await;
    let job = h
        .jobs
        .create_job(request("python", "print(1)"), "user_1")
        .await
        .unwrap();

    let err = h.jobs.get_job(&job.job_id, "user_2").await.unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));
    assert!(h.jobs.list_jobs("user_2").await.unwrap().is_empty());
    assert_eq!(h.jobs.list_jobs("user_1").await.unwrap().len(), 1);
    h.stop().await;
}

#[tokio::test]
async fn test_unknown_status_leaves_job_untouched() {
    let h = Harness::new().await;
    let job = h
        .jobs
        .create_job(request("python", "print(1)"), "user_1")
        .await
        .unwrap();

    let err = h
        .jobs
        .apply_status_update(update(&job.job_id, "exploded"))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::UnknownStatus(ref s) if s == "exploded"));

    let stored = h.store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Received);
    assert_eq!(stored.updated_at, job.updated_at);
    h.stop().await;
}

#[tokio::test]
async fn test_status_update_for_missing_job() {
    let h = Harness::new().await;
    let err = h
        .jobs
        .apply_status_update(update("missing", "running"))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));
    h.stop().await;
}

#[tokio::test]
async fn test_malformed_status_message_rejected() {
    let h = Harness::new().await;
    let err = h.jobs.handle_status_message(b"not json").await.unwrap_err();
    assert!(matches!(err, JobError::Decode(_)));
    h.stop().await;
}

#[tokio::test]
async fn test_done_maps_to_completed_and_dispatches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = Harness::new().await;
    let sub = subscribe(
        &h.store,
        "user_1",
        &format!("{}/hook", server.uri()),
        None,
        vec![EventKind::JobCompleted],
    )
    .await;
    let job = h
        .jobs
        .create_job(request("python", "print(1)"), "user_1")
        .await
        .unwrap();

    let message = serde_json::json!({
        "id": job.job_id,
        "status": "done",
        "stdout": "1\n",
        "exec_duration": 42,
        "mem_usage": 1024,
    });
    let updated = h
        .jobs
        .handle_status_message(message.to_string().as_bytes())
        .await
        .unwrap();

    assert_eq!(updated.status, JobStatus::Completed);
    assert_eq!(updated.stdout.as_deref(), Some("1\n"));
    assert_eq!(updated.stderr, None);
    assert_eq!(updated.exec_duration, 42);

    let records = wait_for_deliveries(&h.store, sub.id, 1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, EventKind::JobCompleted);
    assert_eq!(records[0].job_id, job.job_id);
    assert!(records[0].delivered);

    let body: serde_json::Value = serde_json::from_str(&records[0].payload).unwrap();
    assert_eq!(body["event"], "job.completed");
    assert_eq!(body["job"]["status"], "completed");
    assert_eq!(body["job"]["stdout"], "1\n");
    h.stop().await;
}

#[tokio::test]
async fn test_failed_without_subscription_creates_no_records() {
    let h = Harness::new().await;
    let sub = subscribe(&h.store, "user_1", "http://127.0.0.1:1/hook", None, vec![EventKind::JobCompleted]).await;
    let job = h
        .jobs
        .create_job(request("python", "raise"), "user_1")
        .await
        .unwrap();

    let mut failed = update(&job.job_id, "failed");
    failed.error = "Traceback".to_string();
    let updated = h.jobs.apply_status_update(failed).await.unwrap();
    assert_eq!(updated.status, JobStatus::Failed);
    assert_eq!(updated.error.as_deref(), Some("Traceback"));

    let store = h.store.clone();
    h.stop().await;
    assert!(store.list_deliveries(sub.id, 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_running_does_not_dispatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = Harness::new().await;
    subscribe(
        &h.store,
        "user_1",
        &format!("{}/hook", server.uri()),
        None,
        vec![EventKind::JobCompleted, EventKind::JobFailed],
    )
    .await;
    let job = h
        .jobs
        .create_job(request("python", "print(1)"), "user_1")
        .await
        .unwrap();

    let updated = h
        .jobs
        .apply_status_update(update(&job.job_id, "running"))
        .await
        .unwrap();
    assert_eq!(updated.status, JobStatus::Running);
    h.stop().await;
}
