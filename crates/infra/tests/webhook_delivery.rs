//! Integration tests for the webhook delivery engine, driven against an
//! in-process HTTP receiver.
//!
//! See tests/support/mod.rs for how to run these (they need DATABASE_URL).

mod support;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use sqlx::PgPool;

use tally_core::EventId;
use tally_infra::jobs::{JobState, OutboxJob, OutboxQueue};
use tally_infra::store::EventRecord;
use tally_infra::webhooks::{
    signature, DeliveryLog, DeliveryStatus, EndpointStore, NewEndpoint, WebhookWorker,
    WorkerConfig,
};

use support::*;

#[derive(Debug, Clone)]
struct Received {
    signature: String,
    body: Vec<u8>,
}

#[derive(Clone, Default)]
struct ReceiverState {
    requests: Arc<Mutex<Vec<Received>>>,
    /// Status codes to return, in order; 200 once the script runs out.
    script: Arc<Mutex<VecDeque<u16>>>,
}

impl ReceiverState {
    fn scripted(codes: &[u16]) -> Self {
        Self {
            requests: Arc::default(),
            script: Arc::new(Mutex::new(codes.iter().copied().collect())),
        }
    }

    fn received(&self) -> Vec<Received> {
        self.requests.lock().unwrap().clone()
    }
}

async fn receive(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.requests.lock().unwrap().push(Received {
        signature,
        body: body.to_vec(),
    });
    let code = state.script.lock().unwrap().pop_front().unwrap_or(200);
    StatusCode::from_u16(code).unwrap_or(StatusCode::OK)
}

/// Spawn the receiver on an ephemeral port; aborted when the handle drops.
async fn spawn_receiver(state: ReceiverState) -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new().route("/", post(receive)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (url, handle)
}

fn worker(pool: &PgPool, queue: &OutboxQueue) -> WebhookWorker {
    let config = WorkerConfig::default();
    let client = config.build_client().unwrap();
    WebhookWorker::new(pool.clone(), queue.clone(), client, config)
}

async fn stored_event(pool: &PgPool, event_id: EventId) -> EventRecord {
    tally_infra::store::events::load(pool, event_id)
        .await
        .unwrap()
        .expect("event exists")
}

/// Claim the single pending job, rescheduling `run_at` first if backoff
/// pushed it into the future.
async fn reclaim(pool: &PgPool, queue: &OutboxQueue) -> OutboxJob {
    sqlx::query("UPDATE outbox_jobs SET run_at = NOW() WHERE state IN ('available', 'retryable')")
        .execute(pool)
        .await
        .unwrap();
    queue.fetch(1).await.unwrap().remove(0)
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn delivers_signed_payload_and_records_success(pool: PgPool) {
    let state = ReceiverState::scripted(&[200]);
    let (url, _server) = spawn_receiver(state.clone()).await;

    let ledger_id = seed_cash_revenue(&pool).await;
    let endpoint = EndpointStore::new(pool.clone())
        .create(ledger_id, NewEndpoint { url })
        .await
        .unwrap();

    command_service(&pool)
        .post_transaction(ledger_id, balanced_command("wh1"))
        .await
        .unwrap();

    let queue = queue(&pool);
    let job = queue.fetch(1).await.unwrap().remove(0);
    worker(&pool, &queue).process(&job).await;

    // Body is byte-for-byte the stored payload; the signature verifies.
    let received = state.received();
    assert_eq!(received.len(), 1);
    let event = stored_event(&pool, job.event_id).await;
    let expected_body = serde_json::to_vec(&event.payload).unwrap();
    assert_eq!(received[0].body, expected_body);
    assert!(signature::verify(
        &endpoint.secret,
        &received[0].body,
        &received[0].signature
    ));

    let deliveries = DeliveryLog::new(pool.clone())
        .list_for_event(job.event_id)
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Success);
    assert_eq!(deliveries[0].http_status, 200);
    assert_eq!(deliveries[0].endpoint_id, endpoint.id);

    let stored = queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Completed);
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn success_is_sticky_no_further_attempts(pool: PgPool) {
    let state = ReceiverState::scripted(&[200]);
    let (url, _server) = spawn_receiver(state.clone()).await;

    let ledger_id = seed_cash_revenue(&pool).await;
    EndpointStore::new(pool.clone())
        .create(ledger_id, NewEndpoint { url })
        .await
        .unwrap();
    command_service(&pool)
        .post_transaction(ledger_id, balanced_command("wh2"))
        .await
        .unwrap();

    let queue = queue(&pool);
    let w = worker(&pool, &queue);
    let job = queue.fetch(1).await.unwrap().remove(0);
    w.process(&job).await;
    assert_eq!(state.received().len(), 1);

    // Force the job claimable again: the per-pair success gate must skip the
    // endpoint without sending.
    sqlx::query("UPDATE outbox_jobs SET state = 'available', run_at = NOW() WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .unwrap();
    let job = queue.fetch(1).await.unwrap().remove(0);
    w.process(&job).await;

    assert_eq!(state.received().len(), 1);
    let deliveries = DeliveryLog::new(pool.clone())
        .list_for_event(job.event_id)
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 1);
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn server_errors_retry_until_success(pool: PgPool) {
    let state = ReceiverState::scripted(&[500, 500, 500, 200]);
    let (url, _server) = spawn_receiver(state.clone()).await;

    let ledger_id = seed_cash_revenue(&pool).await;
    let endpoint = EndpointStore::new(pool.clone())
        .create(ledger_id, NewEndpoint { url })
        .await
        .unwrap();
    command_service(&pool)
        .post_transaction(ledger_id, balanced_command("wh3"))
        .await
        .unwrap();

    let queue = queue(&pool);
    let w = worker(&pool, &queue);

    let job = queue.fetch(1).await.unwrap().remove(0);
    w.process(&job).await;
    for _ in 0..3 {
        let job = reclaim(&pool, &queue).await;
        w.process(&job).await;
    }

    assert_eq!(state.received().len(), 4);

    let deliveries = DeliveryLog::new(pool.clone())
        .list_for_event(job.event_id)
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 4);
    for d in &deliveries[..3] {
        assert_eq!(d.status, DeliveryStatus::RetryableError);
        assert_eq!(d.http_status, 500);
        assert_eq!(d.endpoint_id, endpoint.id);
    }
    assert_eq!(deliveries[3].status, DeliveryStatus::Success);
    assert_eq!(deliveries[3].http_status, 200);
    assert_eq!(deliveries[3].endpoint_id, endpoint.id);

    let stored = queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Completed);
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn client_error_is_terminal_without_retry(pool: PgPool) {
    let state = ReceiverState::scripted(&[404]);
    let (url, _server) = spawn_receiver(state.clone()).await;

    let ledger_id = seed_cash_revenue(&pool).await;
    EndpointStore::new(pool.clone())
        .create(ledger_id, NewEndpoint { url })
        .await
        .unwrap();
    command_service(&pool)
        .post_transaction(ledger_id, balanced_command("wh4"))
        .await
        .unwrap();

    let queue = queue(&pool);
    let job = queue.fetch(1).await.unwrap().remove(0);
    worker(&pool, &queue).process(&job).await;

    let deliveries = DeliveryLog::new(pool.clone())
        .list_for_event(job.event_id)
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::NonRetryableError);
    assert_eq!(deliveries[0].http_status, 404);

    // Non-retryable outcomes complete the job; nothing reschedules.
    let stored = queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Completed);
    assert_eq!(state.received().len(), 1);
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn no_active_endpoints_completes_without_sending(pool: PgPool) {
    let ledger_id = seed_cash_revenue(&pool).await;
    command_service(&pool)
        .post_transaction(ledger_id, balanced_command("wh5"))
        .await
        .unwrap();

    let queue = queue(&pool);
    let job = queue.fetch(1).await.unwrap().remove(0);
    worker(&pool, &queue).process(&job).await;

    assert_eq!(queue.get(job.id).await.unwrap().unwrap().state, JobState::Completed);
    assert_eq!(count_rows(&pool, "webhook_deliveries").await, 0);
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn mixed_endpoints_retry_only_the_failing_one(pool: PgPool) {
    let healthy = ReceiverState::scripted(&[200, 200]);
    let flaky = ReceiverState::scripted(&[500, 200]);
    let (healthy_url, _s1) = spawn_receiver(healthy.clone()).await;
    let (flaky_url, _s2) = spawn_receiver(flaky.clone()).await;

    let ledger_id = seed_cash_revenue(&pool).await;
    let store = EndpointStore::new(pool.clone());
    store
        .create(ledger_id, NewEndpoint { url: healthy_url })
        .await
        .unwrap();
    store
        .create(ledger_id, NewEndpoint { url: flaky_url })
        .await
        .unwrap();
    command_service(&pool)
        .post_transaction(ledger_id, balanced_command("wh6"))
        .await
        .unwrap();

    let queue = queue(&pool);
    let w = worker(&pool, &queue);

    let job = queue.fetch(1).await.unwrap().remove(0);
    w.process(&job).await;
    // First round: one success, one 500 -> job rescheduled.
    assert_eq!(queue.get(job.id).await.unwrap().unwrap().state, JobState::Retryable);

    let job = reclaim(&pool, &queue).await;
    w.process(&job).await;

    // Healthy endpoint was not contacted again.
    assert_eq!(healthy.received().len(), 1);
    assert_eq!(flaky.received().len(), 2);
    assert_eq!(queue.get(job.id).await.unwrap().unwrap().state, JobState::Completed);
}

#[sqlx::test(migrator = "tally_infra::MIGRATOR")]
#[ignore = "requires DATABASE_URL (see tests/support/mod.rs)"]
async fn inactive_endpoints_are_not_contacted(pool: PgPool) {
    let state = ReceiverState::scripted(&[]);
    let (url, _server) = spawn_receiver(state.clone()).await;

    let ledger_id = seed_cash_revenue(&pool).await;
    let store = EndpointStore::new(pool.clone());
    let endpoint = store
        .create(ledger_id, NewEndpoint { url })
        .await
        .unwrap();
    store
        .set_active(ledger_id, endpoint.id, false)
        .await
        .unwrap();
    command_service(&pool)
        .post_transaction(ledger_id, balanced_command("wh7"))
        .await
        .unwrap();

    let queue = queue(&pool);
    let job = queue.fetch(1).await.unwrap().remove(0);
    worker(&pool, &queue).process(&job).await;

    assert!(state.received().is_empty());
    assert_eq!(queue.get(job.id).await.unwrap().unwrap().state, JobState::Completed);
}
