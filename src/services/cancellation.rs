use crate::database::booking_repository::{
    Booking, BookingPaymentStatus, BookingRepository,
};
use crate::database::error::DatabaseError;
use crate::database::payment_repository::{Payment, PaymentRepository};
use crate::database::refund_repository::{Refund, RefundRepository, RefundType};
use crate::database::ride_repository::Ride;
use crate::database::rpc::BookingRpc;
use crate::payments::error::PaymentError;
use crate::payments::factory::ProviderRegistry;
use crate::payments::types::{ProviderName, RefundRequest, RefundStatus};
use bigdecimal::BigDecimal;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CancellationError {
    #[error("booking {0} not found")]
    BookingNotFound(Uuid),

    #[error("booking has no completed payments to refund")]
    NothingToRefund,

    #[error("seat count can only be reduced below the current {current}")]
    InvalidSeatReduction { current: i32 },

    #[error("cancel transaction failed: {0}")]
    CancelRejected(String),

    #[error(transparent)]
    Provider(#[from] PaymentError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone)]
pub struct CancellationOutcome {
    pub booking_cancelled: bool,
    pub refund_id: Option<Uuid>,
    /// The local cancel transaction succeeded but the external refund call
    /// did not; the refund row is kept in `failed` for retry/audit.
    pub refund_dispatch_failed: bool,
}

/// Restoration rule for a completed partial refund: promote the booking's
/// payment status to `partial_refund` only from a state that still
/// reflects collected money. A booking whose payment state already moved
/// to `failed` (or anything else) keeps it; an unconditional overwrite
/// could resurrect a state the orchestrator had invalidated.
pub fn restored_payment_status(
    current: Option<BookingPaymentStatus>,
    refund_type: RefundType,
) -> Option<BookingPaymentStatus> {
    match (refund_type, current) {
        (
            RefundType::Partial,
            Some(BookingPaymentStatus::Completed) | Some(BookingPaymentStatus::Partial),
        ) => Some(BookingPaymentStatus::PartialRefund),
        _ => None,
    }
}

/// Amount returned to the rider when a paid booking shrinks from
/// `current_seats` to `new_seats`.
pub fn seat_reduction_refund_amount(
    price_per_seat: &BigDecimal,
    current_seats: i32,
    new_seats: i32,
) -> BigDecimal {
    price_per_seat * BigDecimal::from((current_seats - new_seats).max(0))
}

/// Cancel-with-refund flow. The atomic cancel+prepare-refund transaction
/// and the external refund API call are deliberately decoupled: a refund
/// timeout must not resurrect a cancelled booking.
pub struct CancellationService {
    bookings: Arc<BookingRepository>,
    payments: Arc<PaymentRepository>,
    refunds: Arc<RefundRepository>,
    rpc: Arc<BookingRpc>,
    registry: Arc<ProviderRegistry>,
}

impl CancellationService {
    pub fn new(
        bookings: Arc<BookingRepository>,
        payments: Arc<PaymentRepository>,
        refunds: Arc<RefundRepository>,
        rpc: Arc<BookingRpc>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            bookings,
            payments,
            refunds,
            rpc,
            registry,
        }
    }

    /// Full cancellation of a paid booking: sum every completed payment
    /// (bookings can be topped up in parts), run the atomic
    /// cancel+prepare-refund procedure, then dispatch the provider refund.
    pub async fn cancel_paid_booking(
        &self,
        booking: &Booking,
    ) -> Result<CancellationOutcome, CancellationError> {
        let completed = self.payments.list_completed_by_booking(booking.id).await?;
        if completed.is_empty() {
            return Err(CancellationError::NothingToRefund);
        }

        let total: BigDecimal = completed.iter().map(|p| p.amount.clone()).sum();
        let payment_ids: Vec<Uuid> = completed.iter().map(|p| p.id).collect();
        let (provider, phone_number, currency) = refund_destination(&completed)?;

        let result = self
            .rpc
            .cancel_with_refund(
                booking.id,
                booking.user_id,
                total.clone(),
                &currency,
                provider.as_str(),
                &phone_number,
                &payment_ids,
            )
            .await?;

        if !result.success {
            return Err(CancellationError::CancelRejected(
                result
                    .error_message
                    .unwrap_or_else(|| "cancel_booking_with_refund returned failure".to_string()),
            ));
        }

        info!(
            booking_id = %booking.id,
            refund_id = ?result.refund_record_id,
            amount = %total,
            "booking cancelled, refund record prepared"
        );

        let refund_id = match result.refund_record_id {
            Some(id) => id,
            None => {
                // Procedure cancelled the booking but created no refund
                // record (zero-amount edge); nothing external to dispatch.
                return Ok(CancellationOutcome {
                    booking_cancelled: result.booking_cancelled,
                    refund_id: None,
                    refund_dispatch_failed: false,
                });
            }
        };

        let dispatch_failed = self
            .dispatch_refund(
                refund_id,
                &provider,
                total,
                &currency,
                &phone_number,
                original_transaction_id(&completed),
            )
            .await;

        Ok(CancellationOutcome {
            booking_cancelled: result.booking_cancelled,
            refund_id: Some(refund_id),
            refund_dispatch_failed: dispatch_failed,
        })
    }

    /// Reduce seats on a paid booking and refund the delta. The seat
    /// adjustment goes through the same atomic reservation primitive as
    /// booking creation (update mode), so capacity stays race-free.
    pub async fn reduce_seats_with_refund(
        &self,
        booking: &Booking,
        ride: &Ride,
        new_seats: i32,
    ) -> Result<CancellationOutcome, CancellationError> {
        if new_seats <= 0 || new_seats >= booking.seats {
            return Err(CancellationError::InvalidSeatReduction {
                current: booking.seats,
            });
        }

        let completed = self.payments.list_completed_by_booking(booking.id).await?;
        if completed.is_empty() {
            return Err(CancellationError::NothingToRefund);
        }

        let reservation = self
            .rpc
            .reserve_seats(ride.id, booking.user_id, new_seats, Some(booking.id))
            .await?;
        if !reservation.success {
            return Err(CancellationError::CancelRejected(
                reservation
                    .error_message
                    .unwrap_or_else(|| "seat adjustment rejected".to_string()),
            ));
        }

        let refund_amount =
            seat_reduction_refund_amount(&ride.price, booking.seats, new_seats);
        let payment_ids: Vec<Uuid> = completed.iter().map(|p| p.id).collect();
        let (provider, phone_number, currency) = refund_destination(&completed)?;

        let refund = self
            .refunds
            .create(
                booking.id,
                &payment_ids,
                RefundType::Partial,
                refund_amount.clone(),
                &currency,
                provider.clone(),
                &phone_number,
            )
            .await?;

        info!(
            booking_id = %booking.id,
            refund_id = %refund.id,
            amount = %refund_amount,
            seats_before = booking.seats,
            seats_after = new_seats,
            "partial refund prepared for seat reduction"
        );

        let dispatch_failed = self
            .dispatch_refund(
                refund.id,
                &provider,
                refund_amount,
                &currency,
                &phone_number,
                original_transaction_id(&completed),
            )
            .await;

        Ok(CancellationOutcome {
            booking_cancelled: false,
            refund_id: Some(refund.id),
            refund_dispatch_failed: dispatch_failed,
        })
    }

    /// Apply a provider-confirmed refund outcome to the refund row, the
    /// booking, and (for full refunds) the payment records. Shared by the
    /// refund reconciliation sweep and refund webhooks.
    pub async fn finalize_refund(
        &self,
        refund: &Refund,
        status: RefundStatus,
        failure_reason: Option<&str>,
    ) -> Result<Option<Refund>, CancellationError> {
        if refund.status() == Some(status) {
            return Ok(None); // idempotent re-check
        }

        let updated = self
            .refunds
            .update_status(refund.id, status, failure_reason)
            .await?;

        if status != RefundStatus::Completed {
            return Ok(Some(updated));
        }

        if let Some(booking) = self.bookings.find_by_id(refund.booking_id).await? {
            if let Some(refund_type) = refund.refund_type() {
                if let Some(new_status) =
                    restored_payment_status(booking.payment_status(), refund_type)
                {
                    self.bookings
                        .update_payment_status(booking.id, new_status)
                        .await?;
                }
            }
        }

        // A full refund reverses every covered payment. The state machine
        // only permits completed -> refunded, so anything else is skipped.
        if updated.refund_type() == Some(RefundType::Full) {
            for payment_id in &updated.payment_ids {
                let payment = match self.payments.find_by_id(*payment_id).await {
                    Ok(Some(p)) => p,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(payment_id = %payment_id, error = %e, "payment lookup failed");
                        continue;
                    }
                };
                if payment.status() != Some(crate::payments::types::PaymentStatus::Completed) {
                    continue;
                }
                if let Err(e) = self
                    .payments
                    .update_status(
                        *payment_id,
                        crate::payments::types::PaymentStatus::Refunded,
                        serde_json::json!({"refund_id": updated.id.to_string()}),
                    )
                    .await
                {
                    warn!(payment_id = %payment_id, error = %e, "failed to mark payment refunded");
                }
            }
        }

        info!(
            refund_id = %updated.id,
            booking_id = %updated.booking_id,
            "refund completed and booking state restored"
        );
        Ok(Some(updated))
    }

    /// Returns true when the external call failed. The refund row is
    /// downgraded to `failed`, never deleted, so it stays available for
    /// audit and manual re-dispatch.
    async fn dispatch_refund(
        &self,
        refund_id: Uuid,
        provider: &ProviderName,
        amount: BigDecimal,
        currency: &str,
        phone_number: &str,
        original_transaction_id: Option<String>,
    ) -> bool {
        let request = RefundRequest {
            amount,
            currency: currency.to_string(),
            phone_number: phone_number.to_string(),
            reference: refund_id.to_string(),
            original_transaction_id: original_transaction_id.unwrap_or_default(),
        };

        let dispatch = async {
            let adapter = self.registry.require(provider)?;
            adapter.refund(request).await
        };

        match dispatch.await {
            Ok(receipt) => {
                if let Err(e) = self
                    .refunds
                    .set_transaction_id(refund_id, &receipt.transaction_id)
                    .await
                {
                    warn!(refund_id = %refund_id, error = %e, "failed to record refund transaction id");
                }
                false
            }
            Err(e) => {
                warn!(refund_id = %refund_id, error = %e, "external refund call failed");
                if let Err(db_err) = self
                    .refunds
                    .update_status(refund_id, RefundStatus::Failed, Some(&e.to_string()))
                    .await
                {
                    warn!(refund_id = %refund_id, error = %db_err, "failed to downgrade refund record");
                }
                true
            }
        }
    }
}

fn refund_destination(
    completed: &[Payment],
) -> Result<(ProviderName, String, String), CancellationError> {
    let last = completed.last().ok_or(CancellationError::NothingToRefund)?;
    let provider =
        ProviderName::from_str(&last.provider).map_err(CancellationError::Provider)?;
    Ok((
        provider,
        last.phone_number.clone(),
        last.currency.clone(),
    ))
}

fn original_transaction_id(completed: &[Payment]) -> Option<String> {
    completed.iter().find_map(|p| p.transaction_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn partial_refund_restores_from_paid_states_only() {
        assert_eq!(
            restored_payment_status(Some(BookingPaymentStatus::Completed), RefundType::Partial),
            Some(BookingPaymentStatus::PartialRefund)
        );
        assert_eq!(
            restored_payment_status(Some(BookingPaymentStatus::Partial), RefundType::Partial),
            Some(BookingPaymentStatus::PartialRefund)
        );
        // Prior state is checked first: failed/pending bookings keep it.
        assert_eq!(
            restored_payment_status(Some(BookingPaymentStatus::Failed), RefundType::Partial),
            None
        );
        assert_eq!(
            restored_payment_status(Some(BookingPaymentStatus::Pending), RefundType::Partial),
            None
        );
        assert_eq!(restored_payment_status(None, RefundType::Partial), None);
    }

    #[test]
    fn full_refunds_do_not_rewrite_booking_payment_status() {
        assert_eq!(
            restored_payment_status(Some(BookingPaymentStatus::Completed), RefundType::Full),
            None
        );
    }

    #[test]
    fn reduction_refund_is_price_times_delta() {
        // 3 seats at 1000 XAF reduced to 1 seat refunds 2000 XAF.
        let refund =
            seat_reduction_refund_amount(&BigDecimal::from(1000), 3, 1);
        assert_eq!(refund, BigDecimal::from(2000));
    }

    #[test]
    fn reduction_refund_never_goes_negative() {
        let refund = seat_reduction_refund_amount(&BigDecimal::from(1000), 2, 5);
        assert_eq!(refund, BigDecimal::from(0));
    }

    fn payment(provider: &str, tx: Option<&str>) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            amount: BigDecimal::from(1000),
            currency: "XAF".to_string(),
            provider: provider.to_string(),
            phone_number: "237677123456".to_string(),
            transaction_id: tx.map(|s| s.to_string()),
            idempotency_key: Uuid::new_v4().to_string(),
            status: "completed".to_string(),
            payment_time: Some(Utc::now()),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn refund_destination_uses_latest_completed_payment() {
        let payments = vec![payment("mtn", Some("a")), payment("orange", Some("b"))];
        let (provider, phone, currency) =
            refund_destination(&payments).expect("destination resolves");
        assert_eq!(provider, ProviderName::Orange);
        assert_eq!(phone, "237677123456");
        assert_eq!(currency, "XAF");
    }

    #[test]
    fn original_transaction_id_takes_first_available() {
        let payments = vec![payment("mtn", None), payment("mtn", Some("tx-2"))];
        assert_eq!(original_transaction_id(&payments), Some("tx-2".to_string()));
    }
}
