use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    PendingVerification,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::PendingVerification => "pending_verification",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BookingStatus::Pending),
            "pending_verification" => Some(BookingStatus::PendingVerification),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingPaymentStatus {
    Pending,
    Partial,
    Completed,
    PartialRefund,
    Failed,
}

impl BookingPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingPaymentStatus::Pending => "pending",
            BookingPaymentStatus::Partial => "partial",
            BookingPaymentStatus::Completed => "completed",
            BookingPaymentStatus::PartialRefund => "partial_refund",
            BookingPaymentStatus::Failed => "failed",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BookingPaymentStatus::Pending),
            "partial" => Some(BookingPaymentStatus::Partial),
            "completed" => Some(BookingPaymentStatus::Completed),
            "partial_refund" => Some(BookingPaymentStatus::PartialRefund),
            "failed" => Some(BookingPaymentStatus::Failed),
            _ => None,
        }
    }

    /// Whether any money has been collected for the booking.
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            BookingPaymentStatus::Partial
                | BookingPaymentStatus::Completed
                | BookingPaymentStatus::PartialRefund
        )
    }
}

const BOOKING_COLUMNS: &str = "id, ride_id, user_id, seats, status, payment_status, \
     code_verified, pickup_point_name, pickup_time, created_at, updated_at";

/// Booking entity. Rows are never hard-deleted; terminal outcomes are the
/// `cancelled` / `completed` statuses.
#[derive(Debug, Clone, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub user_id: Uuid,
    pub seats: i32,
    pub status: String,
    pub payment_status: String,
    pub code_verified: bool,
    pub pickup_point_name: Option<String>,
    pub pickup_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn status(&self) -> Option<BookingStatus> {
        BookingStatus::from_db(&self.status)
    }

    pub fn payment_status(&self) -> Option<BookingPaymentStatus> {
        BookingPaymentStatus::from_db(&self.payment_status)
    }
}

pub struct BookingRepository {
    pool: PgPool,
}

impl BookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Booking>, DatabaseError> {
        sqlx::query_as::<_, Booking>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// The unique non-terminal booking a rider holds on a ride, if any.
    pub async fn find_active_by_ride_and_user(
        &self,
        ride_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Booking>, DatabaseError> {
        sqlx::query_as::<_, Booking>(&format!(
            "SELECT {} FROM bookings
             WHERE ride_id = $1 AND user_id = $2
               AND status NOT IN ('cancelled', 'completed')
             ORDER BY created_at DESC
             LIMIT 1",
            BOOKING_COLUMNS
        ))
        .bind(ride_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn update_statuses(
        &self,
        id: Uuid,
        status: BookingStatus,
        payment_status: BookingPaymentStatus,
    ) -> Result<Booking, DatabaseError> {
        sqlx::query_as::<_, Booking>(&format!(
            "UPDATE bookings
             SET status = $2, payment_status = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(payment_status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn update_payment_status(
        &self,
        id: Uuid,
        payment_status: BookingPaymentStatus,
    ) -> Result<Booking, DatabaseError> {
        sqlx::query_as::<_, Booking>(&format!(
            "UPDATE bookings
             SET payment_status = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(payment_status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Promote a booking whose payment completed. The WHERE guard makes the
    /// promotion apply exactly once even when the webhook path and the
    /// booking-creation reconciliation race each other.
    pub async fn mark_payment_received(&self, id: Uuid) -> Result<Option<Booking>, DatabaseError> {
        sqlx::query_as::<_, Booking>(&format!(
            "UPDATE bookings
             SET payment_status = 'completed', status = 'pending_verification', updated_at = NOW()
             WHERE id = $1 AND payment_status <> 'completed'
             RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn set_pickup(
        &self,
        id: Uuid,
        pickup_point_name: &str,
        pickup_time: DateTime<Utc>,
    ) -> Result<Booking, DatabaseError> {
        sqlx::query_as::<_, Booking>(&format!(
            "UPDATE bookings
             SET pickup_point_name = $2, pickup_time = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(pickup_point_name)
        .bind(pickup_time)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn set_code_verified(&self, id: Uuid) -> Result<Booking, DatabaseError> {
        sqlx::query_as::<_, Booking>(&format!(
            "UPDATE bookings
             SET code_verified = TRUE, status = 'confirmed', updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_status_round_trips() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::PendingVerification,
            BookingStatus::Confirmed,
            BookingStatus::Cancelled,
            BookingStatus::Completed,
        ] {
            assert_eq!(BookingStatus::from_db(status.as_str()), Some(status));
        }
        assert_eq!(BookingStatus::from_db("nonsense"), None);
    }

    #[test]
    fn paid_states_are_detected() {
        assert!(BookingPaymentStatus::Completed.is_paid());
        assert!(BookingPaymentStatus::Partial.is_paid());
        assert!(BookingPaymentStatus::PartialRefund.is_paid());
        assert!(!BookingPaymentStatus::Pending.is_paid());
        assert!(!BookingPaymentStatus::Failed.is_paid());
    }

    #[test]
    fn terminal_booking_states() {
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(!BookingStatus::PendingVerification.is_terminal());
    }
}
