//! The webhook worker: drains outbox jobs and fans each event out to the
//! ledger's active subscribers.
//!
//! Delivery is at-least-once. The per-pair idempotency gate is a prior
//! `success` row in the delivery log; everything else about an attempt is
//! recorded but never blocks a retry.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use tally_core::EventId;

use crate::jobs::{OutboxJob, OutboxQueue, QueueError};
use crate::store::{events, StoreError};

use super::deliveries::{DeliveryLog, DeliveryStatus, NewDelivery};
use super::endpoints::{EndpointStore, WebhookEndpoint};
use super::signature;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The event referenced by an outbox job does not exist. The outbox is
    /// written in the event's transaction, so this cannot happen absent
    /// operator interference; the job is discarded.
    #[error("event {0} missing for delivery job")]
    MissingEvent(EventId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Parallel executor tasks drawing from the queue.
    pub concurrency: usize,
    /// Poll cadence when the queue is drained.
    pub poll_interval: Duration,
    /// Jobs claimed per fetch.
    pub batch_size: i64,
    /// Per-request timeout enforced by the shared HTTP client.
    pub request_timeout: Duration,
    /// Service identifier sent as User-Agent.
    pub user_agent: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            batch_size: 10,
            request_timeout: Duration::from_secs(10),
            user_agent: format!("tally/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl WorkerConfig {
    /// Build the shared HTTP client the pool uses. One client per process;
    /// connection reuse depends on it.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .user_agent(self.user_agent.clone())
            .build()
    }
}

#[derive(Debug, Clone)]
pub struct WebhookWorker {
    pool: sqlx::PgPool,
    queue: OutboxQueue,
    endpoints: EndpointStore,
    deliveries: DeliveryLog,
    http: reqwest::Client,
    config: WorkerConfig,
}

/// What a processed job asks of the queue.
#[derive(Debug)]
enum JobOutcome {
    Completed,
    Retry(String),
    Discard(String),
}

impl WebhookWorker {
    pub fn new(
        pool: sqlx::PgPool,
        queue: OutboxQueue,
        http: reqwest::Client,
        config: WorkerConfig,
    ) -> Self {
        Self {
            endpoints: EndpointStore::new(pool.clone()),
            deliveries: DeliveryLog::new(pool.clone()),
            pool,
            queue,
            http,
            config,
        }
    }

    /// Spawn the executor pool. Each task runs [`WebhookWorker::run`] until
    /// `shutdown` flips.
    pub fn spawn_pool(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.concurrency.max(1))
            .map(|i| {
                let worker = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    debug!(executor = i, "webhook executor started");
                    worker.run(shutdown).await;
                    debug!(executor = i, "webhook executor stopped");
                })
            })
            .collect()
    }

    /// Single executor loop: claim, process, repeat; sleep when drained.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender means the process is going away too.
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
                _ = tick.tick() => {
                    loop {
                        let jobs = match self.queue.fetch(self.config.batch_size).await {
                            Ok(jobs) => jobs,
                            Err(e) => {
                                warn!(error = %e, "failed to claim delivery jobs");
                                break;
                            }
                        };
                        if jobs.is_empty() {
                            break;
                        }
                        for job in &jobs {
                            self.process(job).await;
                            if *shutdown.borrow() {
                                return;
                            }
                        }
                        if (jobs.len() as i64) < self.config.batch_size {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Process one claimed job and report the outcome back to the queue.
    #[instrument(skip(self), fields(job_id = job.id, event_id = %job.event_id, attempt = job.attempt))]
    pub async fn process(&self, job: &OutboxJob) {
        let outcome = match self.deliver(job).await {
            Ok(outcome) => outcome,
            Err(DeliveryError::MissingEvent(event_id)) => {
                JobOutcome::Discard(format!("event {event_id} not found"))
            }
            // Transient store faults (including a failed idempotency check)
            // reschedule the job; at-least-once beats silently dropping.
            Err(e) => JobOutcome::Retry(e.to_string()),
        };

        let result = match &outcome {
            JobOutcome::Completed => self.queue.complete(job).await,
            JobOutcome::Retry(reason) => {
                self.queue.retry(job, reason).await.map(|state| {
                    debug!(state = state.as_str(), reason = %reason, "delivery rescheduled");
                })
            }
            JobOutcome::Discard(reason) => {
                warn!(reason = %reason, "delivery job discarded");
                self.queue.discard(job, reason).await
            }
        };

        if let Err(e) = result {
            warn!(error = %e, "failed to update delivery job state");
        }
    }

    /// Fan one event out to all active endpoints of its ledger.
    async fn deliver(&self, job: &OutboxJob) -> Result<JobOutcome, DeliveryError> {
        let event = events::load(&self.pool, job.event_id)
            .await?
            .ok_or(DeliveryError::MissingEvent(job.event_id))?;

        let endpoints = self.endpoints.list_active(event.ledger_id).await?;
        if endpoints.is_empty() {
            return Ok(JobOutcome::Completed);
        }

        // Render the stored payload once; the same bytes back the body and
        // the signature for every endpoint this attempt.
        let body = serde_json::to_vec(&event.payload)
            .map_err(|e| StoreError::corrupt("render_payload", e.to_string()))?;

        let mut retry_reasons: Vec<String> = Vec::new();

        for endpoint in &endpoints {
            // Success is sticky per (event, endpoint).
            if self.deliveries.has_success(event.id, endpoint.id).await? {
                continue;
            }

            let (status, http_status, error) = self.send(endpoint, &body).await;

            // Recording must not mask the send result: a failed insert is
            // logged and the classification still drives the job outcome.
            let record = self
                .deliveries
                .record(NewDelivery {
                    event_id: event.id,
                    endpoint_id: endpoint.id,
                    attempt: job.attempt,
                    status,
                    http_status,
                    error: error.clone(),
                })
                .await;
            if let Err(e) = record {
                warn!(endpoint = %endpoint.url, error = %e, "failed to record delivery attempt");
            }

            match status {
                DeliveryStatus::Success => {
                    debug!(endpoint = %endpoint.url, http_status, "delivered");
                }
                DeliveryStatus::RetryableError => {
                    retry_reasons.push(format!(
                        "{}: {}",
                        endpoint.url,
                        error.as_deref().unwrap_or("retryable error")
                    ));
                }
                DeliveryStatus::NonRetryableError => {
                    warn!(
                        endpoint = %endpoint.url,
                        http_status,
                        error = error.as_deref().unwrap_or(""),
                        "delivery permanently rejected"
                    );
                }
            }
        }

        if retry_reasons.is_empty() {
            Ok(JobOutcome::Completed)
        } else {
            Ok(JobOutcome::Retry(retry_reasons.join("; ")))
        }
    }

    /// One signed POST to one endpoint, classified.
    async fn send(
        &self,
        endpoint: &WebhookEndpoint,
        body: &[u8],
    ) -> (DeliveryStatus, i32, Option<String>) {
        let sig = signature::sign(&endpoint.secret, body);

        let result = self
            .http
            .post(&endpoint.url)
            .header(CONTENT_TYPE, "application/json")
            .header(signature::SIGNATURE_HEADER, sig)
            .body(body.to_vec())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                let code = i32::from(status.as_u16());
                // Drain the body so the connection can be reused.
                let _ = response.bytes().await;

                match classify_status(status) {
                    DeliveryStatus::Success => (DeliveryStatus::Success, code, None),
                    classified => (
                        classified,
                        code,
                        Some(format!("endpoint returned HTTP {code}")),
                    ),
                }
            }
            Err(e) if e.is_builder() => {
                (DeliveryStatus::NonRetryableError, 0, Some(e.to_string()))
            }
            // Connect failures, DNS failures, timeouts.
            Err(e) => (DeliveryStatus::RetryableError, 0, Some(e.to_string())),
        }
    }
}

/// 2xx → success; 5xx → retryable; everything else (including 408/429, which
/// stay with the rest of 4xx) → non-retryable.
fn classify_status(status: reqwest::StatusCode) -> DeliveryStatus {
    if status.is_success() {
        DeliveryStatus::Success
    } else if status.is_server_error() {
        DeliveryStatus::RetryableError
    } else {
        DeliveryStatus::NonRetryableError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn two_xx_is_success() {
        assert_eq!(
            classify_status(StatusCode::OK),
            DeliveryStatus::Success
        );
        assert_eq!(
            classify_status(StatusCode::NO_CONTENT),
            DeliveryStatus::Success
        );
    }

    #[test]
    fn five_xx_is_retryable() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            DeliveryStatus::RetryableError
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            DeliveryStatus::RetryableError
        );
    }

    #[test]
    fn four_xx_is_non_retryable_including_408_and_429() {
        for code in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            assert_eq!(classify_status(code), DeliveryStatus::NonRetryableError);
        }
    }
}
