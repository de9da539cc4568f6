//! The append-only event log.
//!
//! Rows are inserted by the command service inside its transaction and read
//! by the projector and the webhook worker; nothing updates or deletes them.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use tally_core::{EventId, LedgerId};

use super::{map_sqlx_error, StoreError};

/// One committed event, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: EventId,
    pub ledger_id: LedgerId,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: i64,
    ledger_id: Uuid,
    aggregate_type: String,
    aggregate_id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    idempotency_key: Option<String>,
    occurred_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        EventRecord {
            id: EventId::from_i64(row.id),
            ledger_id: LedgerId::from_uuid(row.ledger_id),
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload: row.payload,
            idempotency_key: row.idempotency_key,
            occurred_at: row.occurred_at,
            created_at: row.created_at,
        }
    }
}

/// An event about to be appended.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub ledger_id: LedgerId,
    pub aggregate_type: &'static str,
    pub aggregate_id: Uuid,
    pub event_type: &'static str,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Append one event within the caller's transaction.
///
/// A concurrent submission with the same `(ledger_id, idempotency_key)`
/// surfaces as [`StoreError::UniqueViolation`]; the command service converts
/// that into an idempotent-replay outcome.
pub async fn append(
    tx: &mut Transaction<'_, Postgres>,
    event: NewEvent,
) -> Result<EventRecord, StoreError> {
    let row = sqlx::query_as::<_, EventRow>(
        r#"
        INSERT INTO events (
            ledger_id,
            aggregate_type,
            aggregate_id,
            event_type,
            payload,
            idempotency_key,
            occurred_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, ledger_id, aggregate_type, aggregate_id, event_type,
                  payload, idempotency_key, occurred_at, created_at
        "#,
    )
    .bind(event.ledger_id.as_uuid())
    .bind(event.aggregate_type)
    .bind(event.aggregate_id)
    .bind(event.event_type)
    .bind(&event.payload)
    .bind(&event.idempotency_key)
    .bind(event.occurred_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("append_event", e))?;

    Ok(row.into())
}

/// Look up the event committed under `(ledger_id, idempotency_key)`, if any.
pub async fn find_by_idempotency_key<'e>(
    executor: impl PgExecutor<'e>,
    ledger_id: LedgerId,
    key: &str,
) -> Result<Option<EventRecord>, StoreError> {
    let row = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT id, ledger_id, aggregate_type, aggregate_id, event_type,
               payload, idempotency_key, occurred_at, created_at
        FROM events
        WHERE ledger_id = $1 AND idempotency_key = $2
        "#,
    )
    .bind(ledger_id.as_uuid())
    .bind(key)
    .fetch_optional(executor)
    .await
    .map_err(|e| map_sqlx_error("find_event_by_idempotency_key", e))?;

    Ok(row.map(EventRecord::from))
}

/// Load one event by id (webhook worker path).
pub async fn load<'e>(
    executor: impl PgExecutor<'e>,
    id: EventId,
) -> Result<Option<EventRecord>, StoreError> {
    let row = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT id, ledger_id, aggregate_type, aggregate_id, event_type,
               payload, idempotency_key, occurred_at, created_at
        FROM events
        WHERE id = $1
        "#,
    )
    .bind(id.as_i64())
    .fetch_optional(executor)
    .await
    .map_err(|e| map_sqlx_error("load_event", e))?;

    Ok(row.map(EventRecord::from))
}

/// Fetch up to `limit` events of `event_type` past `after`, in the
/// projector's canonical replay order.
pub async fn fetch_after(
    tx: &mut Transaction<'_, Postgres>,
    event_type: &str,
    after: EventId,
    limit: i64,
) -> Result<Vec<EventRecord>, StoreError> {
    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT id, ledger_id, aggregate_type, aggregate_id, event_type,
               payload, idempotency_key, occurred_at, created_at
        FROM events
        WHERE event_type = $1 AND id > $2
        ORDER BY created_at, id
        LIMIT $3
        "#,
    )
    .bind(event_type)
    .bind(after.as_i64())
    .bind(limit)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fetch_events_after", e))?;

    Ok(rows.into_iter().map(EventRecord::from).collect())
}

/// Highest committed event id of `event_type` (0 when the log is empty).
/// Together with the projector offset this is the lag metric.
pub async fn max_event_id<'e>(
    executor: impl PgExecutor<'e>,
    event_type: &str,
) -> Result<EventId, StoreError> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(id) FROM events WHERE event_type = $1")
            .bind(event_type)
            .fetch_one(executor)
            .await
            .map_err(|e| map_sqlx_error("max_event_id", e))?;

    Ok(EventId::from_i64(max.unwrap_or(0)))
}
