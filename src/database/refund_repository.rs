use crate::database::error::DatabaseError;
use crate::payments::types::{ProviderName, RefundStatus};
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const REFUND_COLUMNS: &str = "id, booking_id, payment_ids, refund_type, amount, currency, \
     provider, phone_number, transaction_id, status, failure_reason, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundType {
    Full,
    Partial,
}

impl RefundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundType::Full => "full",
            RefundType::Partial => "partial",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "full" => Some(RefundType::Full),
            "partial" => Some(RefundType::Partial),
            _ => None,
        }
    }
}

/// Reversal record for a booking. External-API failures downgrade the row
/// to `failed` rather than deleting it, so the sweep can retry or an
/// operator can audit what happened.
#[derive(Debug, Clone, FromRow)]
pub struct Refund {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub payment_ids: Vec<Uuid>,
    pub refund_type: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: String,
    pub phone_number: String,
    pub transaction_id: Option<String>,
    pub status: String,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Refund {
    pub fn status(&self) -> Option<RefundStatus> {
        self.status.parse().ok()
    }

    pub fn refund_type(&self) -> Option<RefundType> {
        RefundType::from_db(&self.refund_type)
    }

    pub fn provider(&self) -> Option<ProviderName> {
        self.provider.parse().ok()
    }
}

pub struct RefundRepository {
    pool: PgPool,
}

impl RefundRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Direct insert used by the partial (seat-reduction) path. Full
    /// cancellation refunds are created inside the
    /// `cancel_booking_with_refund` stored procedure instead.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        booking_id: Uuid,
        payment_ids: &[Uuid],
        refund_type: RefundType,
        amount: BigDecimal,
        currency: &str,
        provider: ProviderName,
        phone_number: &str,
    ) -> Result<Refund, DatabaseError> {
        sqlx::query_as::<_, Refund>(&format!(
            "INSERT INTO refunds
                 (booking_id, payment_ids, refund_type, amount, currency, provider,
                  phone_number, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
             RETURNING {}",
            REFUND_COLUMNS
        ))
        .bind(booking_id)
        .bind(payment_ids)
        .bind(refund_type.as_str())
        .bind(&amount)
        .bind(currency)
        .bind(provider.as_str())
        .bind(phone_number)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Refund>, DatabaseError> {
        sqlx::query_as::<_, Refund>(&format!(
            "SELECT {} FROM refunds WHERE id = $1",
            REFUND_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Refund>, DatabaseError> {
        sqlx::query_as::<_, Refund>(&format!(
            "SELECT {} FROM refunds WHERE transaction_id = $1",
            REFUND_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        status: RefundStatus,
        failure_reason: Option<&str>,
    ) -> Result<Refund, DatabaseError> {
        sqlx::query_as::<_, Refund>(&format!(
            "UPDATE refunds
             SET status = $2, failure_reason = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            REFUND_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(failure_reason)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn set_transaction_id(
        &self,
        id: Uuid,
        transaction_id: &str,
    ) -> Result<Refund, DatabaseError> {
        sqlx::query_as::<_, Refund>(&format!(
            "UPDATE refunds
             SET transaction_id = $2, status = 'processing', updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            REFUND_COLUMNS
        ))
        .bind(id)
        .bind(transaction_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_stale(
        &self,
        staleness_secs: i64,
        limit: i64,
    ) -> Result<Vec<Refund>, DatabaseError> {
        sqlx::query_as::<_, Refund>(&format!(
            "SELECT {} FROM refunds
             WHERE status IN ('pending', 'processing')
               AND updated_at < NOW() - ($1 * INTERVAL '1 second')
               AND transaction_id IS NOT NULL
             ORDER BY updated_at ASC
             LIMIT $2",
            REFUND_COLUMNS
        ))
        .bind(staleness_secs)
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
    fn refund_type_round_trips() {
        assert_eq!(RefundType::from_db("full"), Some(RefundType::Full));
        assert_eq!(RefundType::from_db("partial"), Some(RefundType::Partial));
        assert_eq!(RefundType::from_db("half"), None);
    }

    #[test]
    fn refund_entity_parses_status() {
        let refund = Refund {
            id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            payment_ids: vec![Uuid::new_v4()],
            refund_type: "partial".to_string(),
            amount: BigDecimal::from(2000),
            currency: "XAF".to_string(),
            provider: "pawapay".to_string(),
            phone_number: "237677123456".to_string(),
            transaction_id: None,
            status: "pending".to_string(),
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(refund.status(), Some(RefundStatus::Pending));
        assert_eq!(refund.refund_type(), Some(RefundType::Partial));
        assert_eq!(refund.provider(), Some(ProviderName::Pawapay));
    }
}
