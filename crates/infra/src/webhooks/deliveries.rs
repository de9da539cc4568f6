//! The delivery ledger: one append-only row per attempt per endpoint.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use tally_core::{EndpointId, EventId};

use crate::store::{map_sqlx_error, StoreError};

/// Classification of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// 2xx response. Sticky: no further attempts for this pair.
    Success,
    /// 5xx, connect failure, DNS failure, or timeout.
    RetryableError,
    /// 4xx or a request that could not be built.
    NonRetryableError,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Success => "success",
            DeliveryStatus::RetryableError => "retryable_error",
            DeliveryStatus::NonRetryableError => "non_retryable_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(DeliveryStatus::Success),
            "retryable_error" => Some(DeliveryStatus::RetryableError),
            "non_retryable_error" => Some(DeliveryStatus::NonRetryableError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookDelivery {
    pub id: i64,
    pub event_id: EventId,
    pub endpoint_id: EndpointId,
    pub attempt: i32,
    pub status: DeliveryStatus,
    /// 0 when no HTTP response was received.
    pub http_status: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct DeliveryRow {
    id: i64,
    event_id: i64,
    endpoint_id: Uuid,
    attempt: i32,
    status: String,
    http_status: i32,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl DeliveryRow {
    fn into_delivery(self) -> Result<WebhookDelivery, StoreError> {
        let status = DeliveryStatus::parse(&self.status).ok_or_else(|| {
            StoreError::corrupt("webhook_delivery", format!("status '{}'", self.status))
        })?;
        Ok(WebhookDelivery {
            id: self.id,
            event_id: EventId::from_i64(self.event_id),
            endpoint_id: EndpointId::from_uuid(self.endpoint_id),
            attempt: self.attempt,
            status,
            http_status: self.http_status,
            error: self.error,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub event_id: EventId,
    pub endpoint_id: EndpointId,
    pub attempt: i32,
    pub status: DeliveryStatus,
    pub http_status: i32,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeliveryLog {
    pool: PgPool,
}

impl DeliveryLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one attempt row.
    pub async fn record(&self, delivery: NewDelivery) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_deliveries (event_id, endpoint_id, attempt, status, http_status, error)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(delivery.event_id.as_i64())
        .bind(delivery.endpoint_id.as_uuid())
        .bind(delivery.attempt)
        .bind(delivery.status.as_str())
        .bind(delivery.http_status)
        .bind(&delivery.error)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_delivery", e))?;

        Ok(id)
    }

    /// Per-endpoint idempotency gate: has this pair already succeeded?
    pub async fn has_success(
        &self,
        event_id: EventId,
        endpoint_id: EndpointId,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM webhook_deliveries
                WHERE event_id = $1 AND endpoint_id = $2 AND status = 'success'
            )
            "#,
        )
        .bind(event_id.as_i64())
        .bind(endpoint_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_success_delivery", e))?;

        Ok(exists)
    }

    /// Full attempt history for one event (tests and operational inspection).
    pub async fn list_for_event(
        &self,
        event_id: EventId,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT id, event_id, endpoint_id, attempt, status, http_status, error, created_at
            FROM webhook_deliveries
            WHERE event_id = $1
            ORDER BY id
            "#,
        )
        .bind(event_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_deliveries", e))?;

        rows.into_iter().map(|r| r.into_delivery()).collect()
    }
}
