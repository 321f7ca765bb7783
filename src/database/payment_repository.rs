use crate::database::error::DatabaseError;
use crate::payments::types::{PaymentStatus, ProviderName};
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, booking_id, amount, currency, provider, phone_number, \
     transaction_id, idempotency_key, status, payment_time, metadata, created_at, updated_at";

/// One attempt to collect money for a booking. Several payments may exist
/// per booking (partial top-ups after seat increases).
#[derive(Debug, Clone, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: String,
    pub phone_number: String,
    pub transaction_id: Option<String>,
    pub idempotency_key: String,
    pub status: String,
    pub payment_time: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn status(&self) -> Option<PaymentStatus> {
        self.status.parse().ok()
    }

    pub fn provider(&self) -> Option<ProviderName> {
        self.provider.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub booking_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: ProviderName,
    pub phone_number: String,
    pub idempotency_key: String,
}

pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent insert: a second call with the same idempotency key
    /// returns the row created by the first call instead of inserting. The
    /// unique index on `idempotency_key` makes this race-safe across
    /// concurrent request handlers.
    pub async fn create(&self, new: NewPayment) -> Result<Payment, DatabaseError> {
        let inserted = sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments
                 (booking_id, amount, currency, provider, phone_number, idempotency_key,
                  status, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', '{{}}'::jsonb)
             ON CONFLICT (idempotency_key) DO NOTHING
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(new.booking_id)
        .bind(&new.amount)
        .bind(&new.currency)
        .bind(new.provider.as_str())
        .bind(&new.phone_number)
        .bind(&new.idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match inserted {
            Some(payment) => Ok(payment),
            None => self
                .find_by_idempotency_key(&new.idempotency_key)
                .await?
                .ok_or_else(|| DatabaseError::not_found("Payment", &new.idempotency_key)),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE idempotency_key = $1",
            PAYMENT_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE transaction_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list_by_booking(&self, booking_id: Uuid) -> Result<Vec<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE booking_id = $1 ORDER BY created_at ASC",
            PAYMENT_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list_completed_by_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments
             WHERE booking_id = $1 AND status = 'completed'
             ORDER BY created_at ASC",
            PAYMENT_COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Persist a validated status change, merging metadata. `completed`
    /// stamps `payment_time` once.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        metadata: serde_json::Value,
    ) -> Result<Payment, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments
             SET status = $2,
                 metadata = metadata || $3,
                 payment_time = CASE WHEN $2 = 'completed' THEN COALESCE(payment_time, NOW())
                                     ELSE payment_time END,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn set_transaction_id(
        &self,
        id: Uuid,
        transaction_id: &str,
    ) -> Result<Payment, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments
             SET transaction_id = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(transaction_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Payments stuck in a non-terminal state beyond the staleness
    /// threshold; fed to the reconciliation sweep.
    pub async fn find_stale(
        &self,
        staleness_secs: i64,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments
             WHERE status IN ('pending', 'processing')
               AND updated_at < NOW() - ($1 * INTERVAL '1 second')
               AND transaction_id IS NOT NULL
             ORDER BY updated_at ASC
             LIMIT $2",
            PAYMENT_COLUMNS
        ))
        .bind(staleness_secs)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Completed payments whose booking has not yet absorbed the completion
    /// (the payment-before-booking race closed by booking creation).
    pub async fn find_completed_unreflected(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT p.{} FROM payments p
             JOIN bookings b ON b.id = p.booking_id
             WHERE p.booking_id = $1
               AND p.status = 'completed'
               AND b.payment_status <> 'completed'",
            PAYMENT_COLUMNS.replace(", ", ", p.")
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_entity_parses_status_and_provider() {
        let payment = Payment {
            id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            amount: BigDecimal::from(1000),
            currency: "XAF".to_string(),
            provider: "orange".to_string(),
            phone_number: "237690000000".to_string(),
            transaction_id: Some("OM-1".to_string()),
            idempotency_key: "idem-1".to_string(),
            status: "processing".to_string(),
            payment_time: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(payment.status(), Some(PaymentStatus::Processing));
        assert_eq!(payment.provider(), Some(ProviderName::Orange));
    }

    #[tokio::test]
    #[ignore] // Requires database running
    async fn duplicate_idempotency_key_returns_existing_row() {
        let pool = sqlx::PgPool::connect(
            &std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/saferide_test".to_string()),
        )
        .await
        .expect("test database reachable");
        let repo = PaymentRepository::new(pool);

        let new = NewPayment {
            booking_id: Uuid::new_v4(),
            amount: BigDecimal::from(1500),
            currency: "XAF".to_string(),
            provider: ProviderName::Mtn,
            phone_number: "237677123456".to_string(),
            idempotency_key: format!("idem-{}", Uuid::new_v4()),
        };

        let first = repo.create(new.clone()).await.expect("first insert");
        let second = repo.create(new).await.expect("second insert is a fetch");
        assert_eq!(first.id, second.id);
    }
}
