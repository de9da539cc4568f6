//! Subscriber endpoint configuration.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use tally_core::{EndpointId, LedgerId};

use crate::store::{map_sqlx_error, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEndpoint {
    pub id: EndpointId,
    pub ledger_id: LedgerId,
    pub url: String,
    /// HMAC shared secret. Returned once at creation; redact everywhere else.
    pub secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct EndpointRow {
    id: Uuid,
    ledger_id: Uuid,
    url: String,
    secret: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<EndpointRow> for WebhookEndpoint {
    fn from(row: EndpointRow) -> Self {
        WebhookEndpoint {
            id: EndpointId::from_uuid(row.id),
            ledger_id: LedgerId::from_uuid(row.ledger_id),
            url: row.url,
            secret: row.secret,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewEndpoint {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct EndpointStore {
    pool: PgPool,
}

impl EndpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register an endpoint. The shared secret comes from the OS CSPRNG;
    /// subscribers receive it exactly once in the response.
    #[instrument(skip(self), fields(ledger_id = %ledger_id, url = %endpoint.url), err)]
    pub async fn create(
        &self,
        ledger_id: LedgerId,
        endpoint: NewEndpoint,
    ) -> Result<WebhookEndpoint, StoreError> {
        let row = sqlx::query_as::<_, EndpointRow>(
            r#"
            INSERT INTO webhook_endpoints (id, ledger_id, url, secret)
            VALUES ($1, $2, $3, $4)
            RETURNING id, ledger_id, url, secret, is_active, created_at
            "#,
        )
        .bind(EndpointId::new().as_uuid())
        .bind(ledger_id.as_uuid())
        .bind(&endpoint.url)
        .bind(generate_secret())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_endpoint", e))?;

        Ok(row.into())
    }

    pub async fn list(&self, ledger_id: LedgerId) -> Result<Vec<WebhookEndpoint>, StoreError> {
        let rows = sqlx::query_as::<_, EndpointRow>(
            r#"
            SELECT id, ledger_id, url, secret, is_active, created_at
            FROM webhook_endpoints
            WHERE ledger_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(ledger_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_endpoints", e))?;

        Ok(rows.into_iter().map(WebhookEndpoint::from).collect())
    }

    /// Active subscribers for fan-out.
    pub async fn list_active(
        &self,
        ledger_id: LedgerId,
    ) -> Result<Vec<WebhookEndpoint>, StoreError> {
        let rows = sqlx::query_as::<_, EndpointRow>(
            r#"
            SELECT id, ledger_id, url, secret, is_active, created_at
            FROM webhook_endpoints
            WHERE ledger_id = $1 AND is_active
            ORDER BY created_at
            "#,
        )
        .bind(ledger_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active_endpoints", e))?;

        Ok(rows.into_iter().map(WebhookEndpoint::from).collect())
    }

    pub async fn set_active(
        &self,
        ledger_id: LedgerId,
        id: EndpointId,
        is_active: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE webhook_endpoints SET is_active = $3 WHERE ledger_id = $1 AND id = $2",
        )
        .bind(ledger_id.as_uuid())
        .bind(id.as_uuid())
        .bind(is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_endpoint_active", e))?;

        Ok(result.rows_affected() > 0)
    }
}

/// 32 random bytes from the OS CSPRNG, hex-encoded.
fn generate_secret() -> String {
    let mut buf = [0u8; 32];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_long_and_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
