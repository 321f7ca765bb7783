use crate::database::booking_repository::{Booking, BookingRepository};
use crate::database::error::DatabaseError;
use crate::database::payment_repository::PaymentRepository;
use crate::database::ride_repository::{Ride, RideRepository};
use crate::database::rpc::{BookingRpc, VerificationCode};
use crate::services::cancellation::{CancellationError, CancellationOutcome, CancellationService};
use bigdecimal::BigDecimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("ride {0} not found")]
    RideNotFound(Uuid),

    #[error("booking {0} not found")]
    BookingNotFound(Uuid),

    #[error("ride has been cancelled")]
    RideCancelled,

    #[error("seat reservation rejected: {0}")]
    SeatsUnavailable(String),

    #[error("unknown pickup point '{0}' for this ride")]
    InvalidPickupPoint(String),

    #[error("requested seat count must be positive")]
    InvalidSeatCount,

    #[error("seat reduction on a paid booking requires the explicit refund flow")]
    SeatReductionNeedsRefund,

    #[error("booking belongs to another rider")]
    NotBookingOwner,

    #[error("cancellation is no longer possible: the ride was confirmed with the driver")]
    AlreadyVerified,

    #[error(transparent)]
    Cancellation(#[from] CancellationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone)]
pub struct CreateBookingInput {
    pub ride_id: Uuid,
    pub user_id: Uuid,
    pub seats: i32,
    pub pickup_point: Option<String>,
}

/// Amount still owed when a booking's seat count changes. Paid bookings
/// are charged only for the added seats; reductions must go through the
/// refund flow instead.
pub fn additional_payment_amount(
    booking: &Booking,
    ride: &Ride,
    new_seats: i32,
) -> Result<BigDecimal, BookingError> {
    if new_seats <= 0 {
        return Err(BookingError::InvalidSeatCount);
    }

    let paid = booking.payment_status().map(|s| s.is_paid()).unwrap_or(false);
    if !paid {
        return Ok(&ride.price * BigDecimal::from(new_seats));
    }

    if new_seats < booking.seats {
        return Err(BookingError::SeatReductionNeedsRefund);
    }
    Ok(&ride.price * BigDecimal::from(new_seats - booking.seats))
}

/// Seat reservation orchestration plus the creation-side half of the
/// payment/booking race reconciliation.
pub struct BookingService {
    bookings: Arc<BookingRepository>,
    rides: Arc<RideRepository>,
    payments: Arc<PaymentRepository>,
    rpc: Arc<BookingRpc>,
    cancellation: Arc<CancellationService>,
}

impl BookingService {
    pub fn new(
        bookings: Arc<BookingRepository>,
        rides: Arc<RideRepository>,
        payments: Arc<PaymentRepository>,
        rpc: Arc<BookingRpc>,
        cancellation: Arc<CancellationService>,
    ) -> Self {
        Self {
            bookings,
            rides,
            payments,
            rpc,
            cancellation,
        }
    }

    /// Create or update a booking. All seat accounting happens inside the
    /// reservation stored procedure; this method decides create-vs-update
    /// mode, resolves the pickup point, and closes the completed-payment
    /// race left open by webhook ordering.
    pub async fn create_booking(
        &self,
        input: CreateBookingInput,
    ) -> Result<Booking, BookingError> {
        if input.seats <= 0 {
            return Err(BookingError::InvalidSeatCount);
        }

        let ride = self
            .rides
            .find_by_id(input.ride_id)
            .await?
            .ok_or(BookingError::RideNotFound(input.ride_id))?;
        if ride.is_cancelled() {
            return Err(BookingError::RideCancelled);
        }

        // Resolve the pickup before reserving so a bad name costs nothing.
        let pickup = match input.pickup_point.as_deref() {
            Some(name) => Some(
                ride.resolve_pickup(name)
                    .ok_or_else(|| BookingError::InvalidPickupPoint(name.to_string()))?,
            ),
            None => None,
        };

        // At most one active booking per rider per ride: an existing one
        // switches the primitive into update mode.
        let existing = self
            .bookings
            .find_active_by_ride_and_user(input.ride_id, input.user_id)
            .await?;

        let reservation = self
            .rpc
            .reserve_seats(
                input.ride_id,
                input.user_id,
                input.seats,
                existing.as_ref().map(|b| b.id),
            )
            .await?;
        if !reservation.success {
            return Err(BookingError::SeatsUnavailable(
                reservation
                    .error_message
                    .unwrap_or_else(|| "not enough seats available".to_string()),
            ));
        }
        let booking_id = reservation
            .booking_id
            .ok_or_else(|| BookingError::SeatsUnavailable("no booking id returned".to_string()))?;

        if let Some((point, pickup_time)) = pickup {
            self.bookings
                .set_pickup(booking_id, &point.name, pickup_time)
                .await?;
        }

        let mut booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))?;

        // Reconciliation check: a payment may have completed before this
        // booking row existed (async webhook delivery). Promote exactly
        // once; the conditional UPDATE makes double promotion impossible.
        let unreflected = self.payments.find_completed_unreflected(booking_id).await?;
        if !unreflected.is_empty() {
            if let Some(promoted) = self.bookings.mark_payment_received(booking_id).await? {
                info!(
                    booking_id = %booking_id,
                    payments = unreflected.len(),
                    "booking inherited already-completed payment"
                );
                booking = promoted;
            }
        }

        info!(
            booking_id = %booking.id,
            ride_id = %input.ride_id,
            user_id = %input.user_id,
            seats = input.seats,
            updated = existing.is_some(),
            "booking reserved"
        );
        Ok(booking)
    }

    pub async fn calculate_additional_payment_amount(
        &self,
        booking_id: Uuid,
        new_seats: i32,
    ) -> Result<BigDecimal, BookingError> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))?;
        let ride = self
            .rides
            .find_by_id(booking.ride_id)
            .await?
            .ok_or(BookingError::RideNotFound(booking.ride_id))?;
        additional_payment_amount(&booking, &ride, new_seats)
    }

    /// Cancel a booking. Blocked outright after code verification: the
    /// driver has been confirmed (and possibly paid), so the service has
    /// effectively been rendered.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
    ) -> Result<CancellationOutcome, BookingError> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))?;
        if booking.user_id != user_id {
            return Err(BookingError::NotBookingOwner);
        }
        if booking.code_verified {
            return Err(BookingError::AlreadyVerified);
        }

        let paid = booking.payment_status().map(|s| s.is_paid()).unwrap_or(false);
        if paid {
            return Ok(self.cancellation.cancel_paid_booking(&booking).await?);
        }

        let cancelled = self.rpc.cancel_and_restore_seats(booking_id).await?;
        if !cancelled {
            warn!(booking_id = %booking_id, "cancel_booking_restore_seats returned false");
            return Err(BookingError::Cancellation(
                CancellationError::CancelRejected(
                    "cancel_booking_restore_seats rejected the cancellation".to_string(),
                ),
            ));
        }

        info!(booking_id = %booking_id, "unpaid booking cancelled, seats restored");
        Ok(CancellationOutcome {
            booking_cancelled: true,
            refund_id: None,
            refund_dispatch_failed: false,
        })
    }

    /// Current verification code for the rider who owns the booking.
    pub async fn get_verification_code(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<VerificationCode>, BookingError> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))?;
        if booking.user_id != user_id {
            return Err(BookingError::NotBookingOwner);
        }
        Ok(self.rpc.get_verification_code(booking_id).await?)
    }

    /// Shrink a paid booking, refunding the seat delta.
    pub async fn reduce_seats(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        new_seats: i32,
    ) -> Result<CancellationOutcome, BookingError> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))?;
        if booking.user_id != user_id {
            return Err(BookingError::NotBookingOwner);
        }
        if booking.code_verified {
            return Err(BookingError::AlreadyVerified);
        }
        let ride = self
            .rides
            .find_by_id(booking.ride_id)
            .await?
            .ok_or(BookingError::RideNotFound(booking.ride_id))?;

        Ok(self
            .cancellation
            .reduce_seats_with_refund(&booking, &ride, new_seats)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn booking(seats: i32, payment_status: &str) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            ride_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            seats,
            status: "pending".to_string(),
            payment_status: payment_status.to_string(),
            code_verified: false,
            pickup_point_name: None,
            pickup_time: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ride(price: &str) -> Ride {
        Ride {
            id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            seats_available: 4,
            price: BigDecimal::from_str(price).expect("valid decimal"),
            currency: "XAF".to_string(),
            departure_time: Utc::now(),
            pickup_points: serde_json::json!([]),
            status: "scheduled".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn paid_booking_pays_only_the_seat_delta() {
        let amount = additional_payment_amount(&booking(2, "completed"), &ride("1000"), 3)
            .expect("delta charge");
        assert_eq!(amount, BigDecimal::from(1000));
    }

    #[test]
    fn partial_refund_booking_also_pays_only_the_delta() {
        let amount = additional_payment_amount(&booking(1, "partial_refund"), &ride("1000"), 2)
            .expect("delta charge");
        assert_eq!(amount, BigDecimal::from(1000));
    }

    #[test]
    fn unpaid_booking_pays_the_full_new_total() {
        let amount = additional_payment_amount(&booking(2, "pending"), &ride("1500"), 3)
            .expect("full charge");
        assert_eq!(amount, BigDecimal::from(4500));
    }

    #[test]
    fn seat_reduction_on_paid_booking_is_rejected_here() {
        let err = additional_payment_amount(&booking(3, "completed"), &ride("1000"), 1)
            .expect_err("reductions go through the refund flow");
        assert!(matches!(err, BookingError::SeatReductionNeedsRefund));
    }

    #[test]
    fn unchanged_seat_count_owes_nothing_when_paid() {
        let amount = additional_payment_amount(&booking(2, "completed"), &ride("1000"), 2)
            .expect("no charge");
        assert_eq!(amount, BigDecimal::from(0));
    }

    #[test]
    fn non_positive_seat_counts_are_invalid() {
        assert!(matches!(
            additional_payment_amount(&booking(2, "pending"), &ride("1000"), 0),
            Err(BookingError::InvalidSeatCount)
        ));
    }
}
