// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fan-out of job events to matching subscriptions through a bounded pool.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use super::WebhookError;
use super::sender::WebhookSender;
use crate::models::{CallbackSubscription, EventKind, JobSnapshot, WebhookPayload};
use crate::persistence::Store;

/// One queued delivery: a payload bound for one subscription.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    /// Target subscription.
    pub subscription: CallbackSubscription,
    /// Payload to deliver.
    pub payload: WebhookPayload,
}

/// Entry point used by the job service when a job reaches a terminal state.
#[derive(Clone)]
pub struct WebhookDispatcher {
    store: Arc<dyn Store>,
    queue: mpsc::Sender<DeliveryJob>,
}

impl WebhookDispatcher {
    /// Create a dispatcher and the pool that drains its queue.
    ///
    /// `queue_capacity` bounds the jobs waiting for a slot; `max_concurrency`
    /// bounds deliveries in flight.
    pub fn new(
        store: Arc<dyn Store>,
        sender: WebhookSender,
        max_concurrency: usize,
        queue_capacity: usize,
    ) -> (Self, DeliveryPool) {
        let (queue, receiver) = mpsc::channel(queue_capacity.max(1));
        let pool = DeliveryPool {
            receiver,
            sender,
            slots: Arc::new(Semaphore::new(max_concurrency.max(1))),
            shutdown: Arc::new(Notify::new()),
        };
        (Self { store, queue }, pool)
    }

    /// Queue `event` for every active subscription of `owner_id` listening for it.
    ///
    /// Returns the number of deliveries queued. Waits only for queue space,
    /// never for a delivery outcome.
    pub async fn dispatch(
        &self,
        event: EventKind,
        owner_id: &str,
        job: JobSnapshot,
    ) -> Result<usize, WebhookError> {
        let subscriptions: Vec<CallbackSubscription> = self
            .store
            .list_subscriptions(owner_id, Some(true))
            .await?
            .into_iter()
            .filter(|sub| sub.subscribes_to(event))
            .collect();

        if subscriptions.is_empty() {
            debug!(
                job_id = %job.job_id,
                event = %event,
                owner_id = %owner_id,
                "No webhooks subscribed to this event"
            );
            return Ok(0);
        }

        let payload = WebhookPayload {
            event,
            timestamp: Utc::now(),
            job,
        };

        let count = subscriptions.len();
        for subscription in subscriptions {
            self.queue
                .send(DeliveryJob {
                    subscription,
                    payload: payload.clone(),
                })
                .await
                .map_err(|_| WebhookError::QueueClosed)?;
        }

        info!(
            job_id = %payload.job.job_id,
            event = %event,
            subscriptions = count,
            "Queued webhook deliveries"
        );
        Ok(count)
    }
}

/// Runs queued deliveries, at most `max_concurrency` at a time.
pub struct DeliveryPool {
    receiver: mpsc::Receiver<DeliveryJob>,
    sender: WebhookSender,
    slots: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

impl DeliveryPool {
    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the pool until shutdown or until every dispatcher is dropped.
    ///
    /// On shutdown the queue is closed, jobs already queued are still started,
    /// and the call returns once every delivery has finished its retry loop.
    pub async fn run(mut self) {
        info!(
            max_concurrency = self.slots.available_permits(),
            "Webhook delivery pool started"
        );

        let mut in_flight = JoinSet::new();

        loop {
            while let Some(result) = in_flight.try_join_next() {
                log_join(result);
            }

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                job = self.receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let sender = self.sender.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                run_job(&sender, job).await;
            });
        }

        self.receiver.close();
        let mut drained = 0usize;
        while let Some(job) = self.receiver.recv().await {
            let Ok(permit) = self.slots.clone().acquire_owned().await else {
                break;
            };
            let sender = self.sender.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                run_job(&sender, job).await;
            });
            drained += 1;
        }

        info!(
            in_flight = in_flight.len(),
            drained, "Webhook delivery pool draining"
        );
        while let Some(result) = in_flight.join_next().await {
            log_join(result);
        }
        info!("Webhook delivery pool stopped");
    }
}

async fn run_job(sender: &WebhookSender, job: DeliveryJob) {
    if let Err(e) = sender.deliver(&job.subscription, &job.payload).await {
        error!(
            subscription_id = job.subscription.id,
            job_id = %job.payload.job.job_id,
            error = %e,
            "Webhook delivery aborted"
        );
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Webhook delivery task panicked");
    }
}
