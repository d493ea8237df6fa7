// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job management: submission, worker status updates and terminal-state events.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::bus::{BusError, JobBus};
use crate::models::{Job, JobStatus, JobSubmission, MAX_LANGUAGE_LEN, NewJob, StatusUpdate};
use crate::persistence::{Store, StoreError};
use crate::webhooks::WebhookDispatcher;

/// Job management errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// The submission failed validation.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// No job with this id is visible to the caller.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// A worker reported a status outside `received|running|done|failed`.
    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    /// A status message was not valid JSON.
    #[error("Malformed status update: {0}")]
    Decode(#[from] serde_json::Error),

    /// Storage failed.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Publishing to the bus failed.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Body of a job submission.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    /// Language runtime, at most 50 characters.
    pub language: String,
    /// Source code.
    pub code: String,
}

/// Coordinates the store, the bus and webhook dispatch for jobs.
pub struct JobService {
    store: Arc<dyn Store>,
    bus: Arc<dyn JobBus>,
    dispatcher: WebhookDispatcher,
}

impl JobService {
    /// Create a new job service.
    pub fn new(store: Arc<dyn Store>, bus: Arc<dyn JobBus>, dispatcher: WebhookDispatcher) -> Self {
        Self {
            store,
            bus,
            dispatcher,
        }
    }

    /// Validate, persist and publish a new job owned by `owner_id`.
    pub async fn create_job(
        &self,
        request: CreateJobRequest,
        owner_id: &str,
    ) -> Result<Job, JobError> {
        let language = request.language.trim();
        let code = request.code.trim();

        if language.is_empty() {
            return Err(JobError::Validation("language is required".into()));
        }
        if language.chars().count() > MAX_LANGUAGE_LEN {
            return Err(JobError::Validation(format!(
                "language must be at most {MAX_LANGUAGE_LEN} characters"
            )));
        }
        if code.is_empty() {
            return Err(JobError::Validation("code is required".into()));
        }

        let job = self
            .store
            .create_job(&NewJob {
                job_id: uuid::Uuid::new_v4().to_string(),
                language: language.to_string(),
                code: code.to_string(),
                owner_id: owner_id.to_string(),
            })
            .await?;

        self.bus
            .publish_job(&JobSubmission {
                id: job.job_id.clone(),
                language: job.language.clone(),
                code: job.code.clone(),
            })
            .await?;

        info!(
            job_id = %job.job_id,
            language = %job.language,
            owner_id = %owner_id,
            "Job created and published"
        );
        Ok(job)
    }

    /// Fetch a job owned by `owner_id`.
    pub async fn get_job(&self, job_id: &str, owner_id: &str) -> Result<Job, JobError> {
        match self.store.get_job(job_id).await? {
            Some(job) if job.owner_id == owner_id => Ok(job),
            _ => Err(JobError::NotFound(job_id.to_string())),
        }
    }

    /// All jobs owned by `owner_id`, newest first.
    pub async fn list_jobs(&self, owner_id: &str) -> Result<Vec<Job>, JobError> {
        Ok(self.store.list_jobs_for_owner(owner_id).await?)
    }

    /// Decode a raw worker message and apply it.
    pub async fn handle_status_message(&self, payload: &[u8]) -> Result<Job, JobError> {
        let update: StatusUpdate = serde_json::from_slice(payload)?;
        self.apply_status_update(update).await
    }

    /// Apply a worker status update.
    ///
    /// Unknown statuses are rejected and leave the job untouched. Entering
    /// `completed` or `failed` dispatches the matching webhook event; dispatch
    /// failures are logged, not returned.
    pub async fn apply_status_update(&self, update: StatusUpdate) -> Result<Job, JobError> {
        let status = JobStatus::from_worker(&update.status)
            .ok_or_else(|| JobError::UnknownStatus(update.status.clone()))?;

        let mut job = self
            .store
            .get_job(&update.id)
            .await?
            .ok_or_else(|| JobError::NotFound(update.id.clone()))?;

        job.status = status;
        job.message = non_empty(update.message);
        job.error = non_empty(update.error);
        job.stdout = non_empty(update.stdout);
        job.stderr = non_empty(update.stderr);
        job.exec_duration = update.exec_duration;
        job.mem_usage = update.mem_usage;
        job.updated_at = Utc::now();

        self.store.update_job(&job).await?;
        info!(job_id = %job.job_id, status = %status, "Job status updated");

        if let Some(event) = status.terminal_event()
            && let Err(e) = self
                .dispatcher
                .dispatch(event, &job.owner_id, job.snapshot())
                .await
        {
            error!(job_id = %job.job_id, event = %event, error = %e, "Failed to dispatch webhook event");
        }

        Ok(job)
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
