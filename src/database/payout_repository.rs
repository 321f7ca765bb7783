use crate::database::error::DatabaseError;
use crate::payments::types::{PayoutStatus, ProviderName};
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const PAYOUT_COLUMNS: &str = "id, booking_id, driver_id, amount, original_amount, \
     transaction_fee, commission, provider, phone_number, transaction_id, status, \
     failure_reason, retryable, retry_count, retry_history, next_retry_at, \
     created_at, updated_at";

/// Driver disbursement for one booking. The unique index on `booking_id`
/// is what makes repeated verification calls safe.
#[derive(Debug, Clone, FromRow)]
pub struct Payout {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub driver_id: Uuid,
    pub amount: BigDecimal,
    pub original_amount: BigDecimal,
    pub transaction_fee: BigDecimal,
    pub commission: BigDecimal,
    pub provider: String,
    pub phone_number: String,
    pub transaction_id: Option<String>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub retryable: bool,
    pub retry_count: i32,
    pub retry_history: serde_json::Value,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payout {
    pub fn status(&self) -> Option<PayoutStatus> {
        self.status.parse().ok()
    }

    pub fn provider(&self) -> Option<ProviderName> {
        self.provider.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct NewPayout {
    pub booking_id: Uuid,
    pub driver_id: Uuid,
    pub amount: BigDecimal,
    pub original_amount: BigDecimal,
    pub transaction_fee: BigDecimal,
    pub commission: BigDecimal,
    pub provider: ProviderName,
    pub phone_number: String,
}

pub struct PayoutRepository {
    pool: PgPool,
}

impl PayoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert guarded by the per-booking unique index; a concurrent or
    /// repeated verification finds the existing row instead.
    pub async fn create(&self, new: NewPayout) -> Result<Payout, DatabaseError> {
        let inserted = sqlx::query_as::<_, Payout>(&format!(
            "INSERT INTO payouts
                 (booking_id, driver_id, amount, original_amount, transaction_fee, commission,
                  provider, phone_number, status, retryable, retry_count, retry_history)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', FALSE, 0, '[]'::jsonb)
             ON CONFLICT (booking_id) DO NOTHING
             RETURNING {}",
            PAYOUT_COLUMNS
        ))
        .bind(new.booking_id)
        .bind(new.driver_id)
        .bind(&new.amount)
        .bind(&new.original_amount)
        .bind(&new.transaction_fee)
        .bind(&new.commission)
        .bind(new.provider.as_str())
        .bind(&new.phone_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match inserted {
            Some(payout) => Ok(payout),
            None => self
                .find_by_booking(new.booking_id)
                .await?
                .ok_or_else(|| DatabaseError::not_found("Payout", new.booking_id)),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Payout>, DatabaseError> {
        sqlx::query_as::<_, Payout>(&format!(
            "SELECT {} FROM payouts WHERE id = $1",
            PAYOUT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payout>, DatabaseError> {
        sqlx::query_as::<_, Payout>(&format!(
            "SELECT {} FROM payouts WHERE transaction_id = $1",
            PAYOUT_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_booking(&self, booking_id: Uuid) -> Result<Option<Payout>, DatabaseError> {
        sqlx::query_as::<_, Payout>(&format!(
            "SELECT {} FROM payouts WHERE booking_id = $1",
            PAYOUT_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_processing(
        &self,
        id: Uuid,
        transaction_id: &str,
    ) -> Result<Payout, DatabaseError> {
        sqlx::query_as::<_, Payout>(&format!(
            "UPDATE payouts
             SET status = 'processing', transaction_id = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYOUT_COLUMNS
        ))
        .bind(id)
        .bind(transaction_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_completed(&self, id: Uuid) -> Result<Payout, DatabaseError> {
        sqlx::query_as::<_, Payout>(&format!(
            "UPDATE payouts
             SET status = 'completed', failure_reason = NULL, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYOUT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Record a failed attempt. `retryable` + `next_retry_at` gate whether
    /// the retry worker will pick the payout up again.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        failure_reason: &str,
        retryable: bool,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<Payout, DatabaseError> {
        sqlx::query_as::<_, Payout>(&format!(
            "UPDATE payouts
             SET status = 'failed',
                 failure_reason = $2,
                 retryable = $3,
                 next_retry_at = $4,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYOUT_COLUMNS
        ))
        .bind(id)
        .bind(failure_reason)
        .bind(retryable)
        .bind(next_retry_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Append one attempt to the retry history and bump the counter.
    pub async fn record_retry_attempt(
        &self,
        id: Uuid,
        attempt: serde_json::Value,
    ) -> Result<Payout, DatabaseError> {
        sqlx::query_as::<_, Payout>(&format!(
            "UPDATE payouts
             SET retry_count = retry_count + 1,
                 retry_history = retry_history || $2::jsonb,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYOUT_COLUMNS
        ))
        .bind(id)
        .bind(serde_json::Value::Array(vec![attempt]))
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_stale(
        &self,
        staleness_secs: i64,
        limit: i64,
    ) -> Result<Vec<Payout>, DatabaseError> {
        sqlx::query_as::<_, Payout>(&format!(
            "SELECT {} FROM payouts
             WHERE status IN ('pending', 'processing')
               AND updated_at < NOW() - ($1 * INTERVAL '1 second')
               AND transaction_id IS NOT NULL
             ORDER BY updated_at ASC
             LIMIT $2",
            PAYOUT_COLUMNS
        ))
        .bind(staleness_secs)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Failed-but-retryable payouts whose cooldown has elapsed and whose
    /// retry budget is not exhausted.
    pub async fn find_due_for_retry(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<Payout>, DatabaseError> {
        sqlx::query_as::<_, Payout>(&format!(
            "SELECT {} FROM payouts
             WHERE status = 'failed'
               AND retryable = TRUE
               AND retry_count < $1
               AND (next_retry_at IS NULL OR next_retry_at <= NOW())
             ORDER BY updated_at ASC
             LIMIT $2",
            PAYOUT_COLUMNS
        ))
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payout_entity_parses_status() {
        let payout = Payout {
            id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            amount: BigDecimal::from(2700),
            original_amount: BigDecimal::from(3000),
            transaction_fee: BigDecimal::from(60),
            commission: BigDecimal::from(240),
            provider: "mtn".to_string(),
            phone_number: "237677123456".to_string(),
            transaction_id: None,
            status: "failed".to_string(),
            failure_reason: Some("timeout".to_string()),
            retryable: true,
            retry_count: 1,
            retry_history: serde_json::json!([]),
            next_retry_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(payout.status(), Some(PayoutStatus::Failed));
        assert_eq!(payout.provider(), Some(ProviderName::Mtn));
    }

    #[tokio::test]
    #[ignore] // Requires database running
    async fn one_payout_per_booking_is_enforced() {
        let pool = sqlx::PgPool::connect(
            &std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/saferide_test".to_string()),
        )
        .await
        .expect("test database reachable");
        let repo = PayoutRepository::new(pool);

        let new = NewPayout {
            booking_id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            amount: BigDecimal::from(2700),
            original_amount: BigDecimal::from(3000),
            transaction_fee: BigDecimal::from(60),
            commission: BigDecimal::from(240),
            provider: ProviderName::Mtn,
            phone_number: "237677123456".to_string(),
        };

        let first = repo.create(new.clone()).await.expect("first insert");
        let second = repo.create(new).await.expect("second call fetches");
        assert_eq!(first.id, second.id);
    }
}
