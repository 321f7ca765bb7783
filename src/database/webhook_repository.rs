use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const EVENT_COLUMNS: &str = "id, event_id, provider, event_type, payload, signature, status, \
     retry_count, error_message, created_at, updated_at";

/// Raw webhook delivery log. Gives ingestion its own idempotency (unique
/// `event_id`) and retry bookkeeping, independent of the payment state
/// machine it feeds.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub event_id: String,
    pub provider: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub signature: Option<String>,
    pub status: String,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert-or-fetch keyed by event id. A redelivered event comes back
    /// with its recorded status so the processor can short-circuit.
    pub async fn log_event(
        &self,
        event_id: &str,
        provider: &str,
        event_type: &str,
        payload: serde_json::Value,
        signature: Option<&str>,
    ) -> Result<WebhookEventRecord, DatabaseError> {
        sqlx::query_as::<_, WebhookEventRecord>(&format!(
            "INSERT INTO webhook_events (event_id, provider, event_type, payload, signature, status)
             VALUES ($1, $2, $3, $4, $5, 'pending')
             ON CONFLICT (event_id) DO UPDATE SET updated_at = NOW()
             RETURNING {}",
            EVENT_COLUMNS
        ))
        .bind(event_id)
        .bind(provider)
        .bind(event_type)
        .bind(payload)
        .bind(signature)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_processed(&self, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE webhook_events
             SET status = 'completed', error_message = NULL, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn record_failure(&self, id: Uuid, error_message: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE webhook_events
             SET status = 'failed', retry_count = retry_count + 1,
                 error_message = $2, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Failed events still inside their retry budget, oldest first.
    pub async fn get_pending_events(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<WebhookEventRecord>, DatabaseError> {
        sqlx::query_as::<_, WebhookEventRecord>(&format!(
            "SELECT {} FROM webhook_events
             WHERE status = 'failed' AND retry_count < $1
             ORDER BY created_at ASC
             LIMIT $2",
            EVENT_COLUMNS
        ))
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
