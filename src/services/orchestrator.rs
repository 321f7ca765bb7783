use crate::database::booking_repository::{
    Booking, BookingPaymentStatus, BookingRepository, BookingStatus,
};
use crate::database::error::DatabaseError;
use crate::database::payment_repository::Payment;
use crate::database::receipt_repository::ReceiptRepository;
use crate::database::rpc::BookingRpc;
use crate::database::ride_repository::RideRepository;
use crate::payments::types::PaymentStatus;
use crate::services::notification::{NotificationService, NotificationType};
use crate::services::payment::{PaymentService, PaymentServiceError};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Payment(#[from] PaymentServiceError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// What the entry point decided to do with a proposed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    /// Payment is already in the target status; redelivered webhook or
    /// repeated sweep. No write, no side effects.
    AlreadyApplied,
    /// Legal transition; persist and run side effects.
    Apply,
    /// Not in the state machine; reject before any write.
    Illegal,
}

/// Decide how to treat a proposed status against the current one. The
/// already-in-target check runs before legality so that duplicate
/// deliveries of a terminal status are a quiet no-op rather than an error.
pub fn transition_decision(current: PaymentStatus, proposed: PaymentStatus) -> TransitionDecision {
    if current == proposed {
        return TransitionDecision::AlreadyApplied;
    }
    if current.can_transition_to(proposed) {
        TransitionDecision::Apply
    } else {
        TransitionDecision::Illegal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChangeOutcome {
    Applied,
    AlreadyApplied,
}

/// The single code path for every payment status change. Webhook handlers
/// and reconciliation sweeps both call `handle_payment_status_change`;
/// neither carries its own side-effect logic.
pub struct PaymentOrchestrator {
    payments: Arc<PaymentService>,
    bookings: Arc<BookingRepository>,
    rides: Arc<RideRepository>,
    receipts: Arc<ReceiptRepository>,
    rpc: Arc<BookingRpc>,
    notifier: Arc<NotificationService>,
    payment_retry_url: String,
}

impl PaymentOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payments: Arc<PaymentService>,
        bookings: Arc<BookingRepository>,
        rides: Arc<RideRepository>,
        receipts: Arc<ReceiptRepository>,
        rpc: Arc<BookingRpc>,
        notifier: Arc<NotificationService>,
        payment_retry_url: String,
    ) -> Self {
        Self {
            payments,
            bookings,
            rides,
            receipts,
            rpc,
            notifier,
            payment_retry_url,
        }
    }

    pub async fn handle_payment_status_change(
        &self,
        payment: &Payment,
        new_status: PaymentStatus,
        metadata: JsonValue,
    ) -> Result<StatusChangeOutcome, OrchestrationError> {
        let current = payment
            .status()
            .ok_or_else(|| PaymentServiceError::CorruptStatus {
                id: payment.id,
                status: payment.status.clone(),
            })?;

        match transition_decision(current, new_status) {
            TransitionDecision::AlreadyApplied => {
                info!(
                    payment_id = %payment.id,
                    status = %new_status,
                    "payment already in target status, skipping"
                );
                return Ok(StatusChangeOutcome::AlreadyApplied);
            }
            TransitionDecision::Illegal => {
                return Err(PaymentServiceError::IllegalTransition {
                    from: current,
                    to: new_status,
                }
                .into());
            }
            TransitionDecision::Apply => {}
        }

        let updated = self
            .payments
            .update_payment_status(payment.id, new_status, metadata)
            .await?;

        match new_status {
            PaymentStatus::Completed => self.on_payment_completed(&updated).await?,
            PaymentStatus::Failed => self.on_payment_failed(&updated).await?,
            _ => {}
        }

        Ok(StatusChangeOutcome::Applied)
    }

    /// Completed payment: promote the booking, issue a verification code,
    /// create the receipt, notify both parties. If the booking row does
    /// not exist yet (webhook beat the booking insert), return quietly;
    /// booking creation reconciles completed payments itself.
    async fn on_payment_completed(&self, payment: &Payment) -> Result<(), OrchestrationError> {
        let booking = match self.bookings.find_by_id(payment.booking_id).await? {
            Some(booking) => booking,
            None => {
                info!(
                    payment_id = %payment.id,
                    booking_id = %payment.booking_id,
                    "payment completed before booking row exists; deferring to booking creation"
                );
                return Ok(());
            }
        };

        let promoted = match self.bookings.mark_payment_received(booking.id).await? {
            Some(updated) => updated,
            None => {
                // Another path (booking-creation reconciliation) already
                // absorbed this completion; side effects have run once.
                info!(
                    booking_id = %booking.id,
                    payment_id = %payment.id,
                    "booking already reflects completed payment, skipping side effects"
                );
                return Ok(());
            }
        };

        let verification_code = match self.rpc.generate_verification_code(promoted.id).await {
            Ok(code) => code,
            Err(e) => {
                warn!(
                    booking_id = %promoted.id,
                    error = %e,
                    "failed to generate verification code; passenger can request one later"
                );
                String::new()
            }
        };

        // Receipt and notifications are best-effort: the financial state
        // transition above is already committed and must not be affected.
        if let Err(e) = self
            .receipts
            .create_or_fetch(
                payment.id,
                promoted.id,
                payment.amount.clone(),
                &payment.currency,
            )
            .await
        {
            warn!(payment_id = %payment.id, error = %e, "receipt creation failed");
        }

        if !verification_code.is_empty() {
            self.notifier
                .notify_passenger(
                    &promoted,
                    NotificationType::PaymentReceived {
                        verification_code: verification_code.clone(),
                    },
                    "Your payment was received. Show this code to your driver at pickup.",
                )
                .await;
        }

        let driver_id = self.driver_for(&promoted).await;
        if let Some(driver_id) = driver_id {
            self.notifier
                .notify_driver(
                    &promoted,
                    driver_id,
                    NotificationType::DriverBookingPaid,
                    "A passenger completed payment for your ride.",
                )
                .await;
        }

        Ok(())
    }

    /// Failed payment: release the booking and point the passenger at the
    /// retry link. Payments are never re-attempted automatically.
    async fn on_payment_failed(&self, payment: &Payment) -> Result<(), OrchestrationError> {
        let booking = match self.bookings.find_by_id(payment.booking_id).await? {
            Some(booking) => booking,
            None => {
                warn!(
                    payment_id = %payment.id,
                    booking_id = %payment.booking_id,
                    "failed payment references missing booking"
                );
                return Ok(());
            }
        };

        let updated = self
            .bookings
            .update_statuses(
                booking.id,
                BookingStatus::Cancelled,
                BookingPaymentStatus::Failed,
            )
            .await?;

        self.notifier
            .notify_passenger(
                &updated,
                NotificationType::PaymentFailed {
                    retry_url: format!("{}/{}", self.payment_retry_url, updated.id),
                },
                "Your payment could not be completed. You can retry from the link.",
            )
            .await;

        Ok(())
    }

    async fn driver_for(&self, booking: &Booking) -> Option<Uuid> {
        match self.rides.find_by_id(booking.ride_id).await {
            Ok(ride) => ride.map(|r| r.driver_id),
            Err(e) => {
                warn!(ride_id = %booking.ride_id, error = %e, "driver lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redelivered_target_status_is_a_no_op() {
        assert_eq!(
            transition_decision(PaymentStatus::Completed, PaymentStatus::Completed),
            TransitionDecision::AlreadyApplied
        );
        assert_eq!(
            transition_decision(PaymentStatus::Failed, PaymentStatus::Failed),
            TransitionDecision::AlreadyApplied
        );
    }

    #[test]
    fn legal_transitions_apply() {
        assert_eq!(
            transition_decision(PaymentStatus::Pending, PaymentStatus::Processing),
            TransitionDecision::Apply
        );
        assert_eq!(
            transition_decision(PaymentStatus::Processing, PaymentStatus::Completed),
            TransitionDecision::Apply
        );
    }

    #[test]
    fn illegal_transitions_are_flagged_before_any_write() {
        assert_eq!(
            transition_decision(PaymentStatus::Completed, PaymentStatus::Processing),
            TransitionDecision::Illegal
        );
        assert_eq!(
            transition_decision(PaymentStatus::Refunded, PaymentStatus::Pending),
            TransitionDecision::Illegal
        );
    }

    #[test]
    fn duplicate_delivery_beats_legality_check() {
        // A redelivered terminal status must not be reported as illegal.
        assert_eq!(
            transition_decision(PaymentStatus::Refunded, PaymentStatus::Refunded),
            TransitionDecision::AlreadyApplied
        );
    }
}
