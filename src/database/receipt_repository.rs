use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const RECEIPT_COLUMNS: &str = "id, payment_id, booking_id, amount, currency, issued_at";

/// Derived artifact keyed 1:1 by payment. Regeneration is always safe: a
/// duplicate-key insert resolves to fetching the existing row.
#[derive(Debug, Clone, FromRow)]
pub struct Receipt {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub issued_at: DateTime<Utc>,
}

pub struct ReceiptRepository {
    pool: PgPool,
}

impl ReceiptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_or_fetch(
        &self,
        payment_id: Uuid,
        booking_id: Uuid,
        amount: BigDecimal,
        currency: &str,
    ) -> Result<Receipt, DatabaseError> {
        let inserted = sqlx::query_as::<_, Receipt>(&format!(
            "INSERT INTO receipts (payment_id, booking_id, amount, currency)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (payment_id) DO NOTHING
             RETURNING {}",
            RECEIPT_COLUMNS
        ))
        .bind(payment_id)
        .bind(booking_id)
        .bind(&amount)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match inserted {
            Some(receipt) => Ok(receipt),
            None => self
                .find_by_payment(payment_id)
                .await?
                .ok_or_else(|| DatabaseError::not_found("Receipt", payment_id)),
        }
    }

    pub async fn find_by_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<Receipt>, DatabaseError> {
        sqlx::query_as::<_, Receipt>(&format!(
            "SELECT {} FROM receipts WHERE payment_id = $1",
            RECEIPT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
