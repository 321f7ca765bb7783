use crate::database::booking_repository::{BookingPaymentStatus, BookingRepository};
use crate::database::error::DatabaseError;
use crate::database::payment_repository::PaymentRepository;
use crate::database::payout_repository::{NewPayout, Payout, PayoutRepository};
use crate::database::ride_repository::RideRepository;
use crate::database::rpc::BookingRpc;
use crate::payments::error::PaymentError;
use crate::payments::factory::ProviderRegistry;
use crate::payments::types::{DisbursementRequest, PayoutStatusCheck, PayoutStatus, ProviderName};
use crate::services::fees::FeeCalculator;
use crate::services::notification::{NotificationService, NotificationType};
use crate::services::retry::{should_retry_payout, RetryPolicy};
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("booking {0} not found")]
    BookingNotFound(Uuid),

    #[error("ride {0} not found")]
    RideNotFound(Uuid),

    #[error("only the ride's driver can verify and collect earnings")]
    NotRideDriver,

    #[error("booking has not been paid")]
    BookingNotPaid,

    #[error("verification code is invalid or expired")]
    InvalidVerificationCode,

    #[error("booking has no completed payments to disburse")]
    NothingToDisburse,

    #[error(transparent)]
    Provider(#[from] PaymentError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Where the driver wants their earnings sent.
#[derive(Debug, Clone)]
pub struct PayoutDestination {
    pub provider: ProviderName,
    pub phone_number: String,
}

#[derive(Debug, Clone)]
pub struct PayoutOutcome {
    pub payout: Payout,
    /// False when this call found an existing payout and disbursed nothing.
    pub initiated: bool,
}

/// Post-verification settlement. Verifying a code is the only trigger for
/// disbursing driver earnings, and the per-booking payout row is the
/// duplicate-disbursement guard.
pub struct PayoutService {
    bookings: Arc<BookingRepository>,
    rides: Arc<RideRepository>,
    payments: Arc<PaymentRepository>,
    payouts: Arc<PayoutRepository>,
    rpc: Arc<BookingRpc>,
    registry: Arc<ProviderRegistry>,
    fees: FeeCalculator,
    notifier: Arc<NotificationService>,
    retry_policy: RetryPolicy,
}

impl PayoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bookings: Arc<BookingRepository>,
        rides: Arc<RideRepository>,
        payments: Arc<PaymentRepository>,
        payouts: Arc<PayoutRepository>,
        rpc: Arc<BookingRpc>,
        registry: Arc<ProviderRegistry>,
        fees: FeeCalculator,
        notifier: Arc<NotificationService>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            bookings,
            rides,
            payments,
            payouts,
            rpc,
            registry,
            fees,
            notifier,
            retry_policy,
        }
    }

    /// Verify the passenger's code and settle the driver's earnings.
    /// Repeating the call (double tap, retried request) returns the
    /// existing payout without disbursing twice.
    pub async fn verify_and_initiate_payout(
        &self,
        booking_id: Uuid,
        requesting_user: Uuid,
        submitted_code: &str,
        destination: PayoutDestination,
    ) -> Result<PayoutOutcome, PayoutError> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(PayoutError::BookingNotFound(booking_id))?;
        let ride = self
            .rides
            .find_by_id(booking.ride_id)
            .await?
            .ok_or(PayoutError::RideNotFound(booking.ride_id))?;

        if ride.driver_id != requesting_user {
            return Err(PayoutError::NotRideDriver);
        }

        match booking.payment_status() {
            Some(BookingPaymentStatus::Completed) | Some(BookingPaymentStatus::Partial) => {}
            _ => return Err(PayoutError::BookingNotPaid),
        }

        if !booking.code_verified {
            let valid = self.rpc.verify_booking_code(booking_id, submitted_code).await?;
            if !valid {
                return Err(PayoutError::InvalidVerificationCode);
            }
            self.bookings.set_code_verified(booking_id).await?;
        }

        // Duplicate-disbursement guard: one payout per booking, ever.
        if let Some(existing) = self.payouts.find_by_booking(booking_id).await? {
            info!(
                booking_id = %booking_id,
                payout_id = %existing.id,
                "payout already exists for booking, skipping disbursement"
            );
            return Ok(PayoutOutcome {
                payout: existing,
                initiated: false,
            });
        }

        // Cumulative gross across every completed payment (multi-payment
        // bookings from seat top-ups).
        let completed = self.payments.list_completed_by_booking(booking_id).await?;
        if completed.is_empty() {
            return Err(PayoutError::NothingToDisburse);
        }
        let gross: BigDecimal = completed.iter().map(|p| p.amount.clone()).sum();
        let currency = completed
            .last()
            .map(|p| p.currency.clone())
            .unwrap_or_else(|| "XAF".to_string());
        let breakdown = self.fees.calculate(&gross);

        let payout = self
            .payouts
            .create(NewPayout {
                booking_id,
                driver_id: ride.driver_id,
                amount: breakdown.net.clone(),
                original_amount: breakdown.gross.clone(),
                transaction_fee: breakdown.transaction_fee.clone(),
                commission: breakdown.commission.clone(),
                provider: destination.provider.clone(),
                phone_number: destination.phone_number.clone(),
            })
            .await?;

        // A racing call can have created the row first; only the creator
        // disburses.
        if payout.status != "pending" || payout.transaction_id.is_some() {
            return Ok(PayoutOutcome {
                payout,
                initiated: false,
            });
        }

        info!(
            booking_id = %booking_id,
            payout_id = %payout.id,
            gross = %breakdown.gross,
            net = %breakdown.net,
            "initiating driver disbursement"
        );

        let payout = self.dispatch_disbursement(&payout, &booking.id).await?;
        Ok(PayoutOutcome {
            payout,
            initiated: true,
        })
    }

    /// Send the disbursement to the provider, recording success and
    /// failure alike; a failed payout row is what reconciliation and the
    /// retry worker feed on.
    pub async fn dispatch_disbursement(
        &self,
        payout: &Payout,
        booking_id: &Uuid,
    ) -> Result<Payout, PayoutError> {
        let provider_name = payout
            .provider()
            .ok_or_else(|| PayoutError::Provider(PaymentError::ValidationError {
                message: format!("payout {} has unknown provider", payout.id),
                field: Some("provider".to_string()),
            }))?;

        let request = DisbursementRequest {
            amount: payout.amount.clone(),
            currency: "XAF".to_string(),
            phone_number: payout.phone_number.clone(),
            reference: payout.id.to_string(),
            reason: Some(format!("Driver earnings for booking {}", booking_id)),
        };

        let dispatch = async {
            let adapter = self.registry.require(&provider_name)?;
            adapter.disburse(request).await
        };

        match dispatch.await {
            Ok(receipt) => {
                let updated = self
                    .payouts
                    .mark_processing(payout.id, &receipt.transaction_id)
                    .await?;
                Ok(updated)
            }
            Err(e) => {
                let retryable = e.is_retryable() && should_retry_payout(Some(&e.to_string()));
                let next_retry_at = retryable
                    .then(|| self.retry_policy.next_attempt_at(Utc::now(), payout.retry_count as u32));
                warn!(
                    payout_id = %payout.id,
                    error = %e,
                    retryable,
                    "disbursement failed; outcome recorded"
                );
                let updated = self
                    .payouts
                    .mark_failed(payout.id, &e.to_string(), retryable, next_retry_at)
                    .await?;
                Ok(updated)
            }
        }
    }

    /// Apply a provider status check to a payout row. Shared by the
    /// reconciliation sweep and payout webhooks so both triggers run the
    /// same bookkeeping.
    pub async fn finalize_from_check(
        &self,
        payout: &Payout,
        check: &PayoutStatusCheck,
    ) -> Result<Option<Payout>, PayoutError> {
        let current = payout.status();
        if current == Some(check.status) {
            return Ok(None); // nothing changed; idempotent sweep
        }

        match check.status {
            PayoutStatus::Completed => {
                let updated = self.payouts.mark_completed(payout.id).await?;
                if let Ok(Some(booking)) = self.bookings.find_by_id(payout.booking_id).await {
                    self.notifier
                        .notify_driver(
                            &booking,
                            payout.driver_id,
                            NotificationType::PayoutCompleted,
                            "Your earnings have been sent to your mobile money account.",
                        )
                        .await;
                }
                Ok(Some(updated))
            }
            PayoutStatus::Failed => {
                let reason = check
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| check.raw_status.clone());
                let retryable = should_retry_payout(Some(&reason))
                    && !self.retry_policy.attempts_exhausted(payout.retry_count as u32);
                let next_retry_at = retryable
                    .then(|| self.retry_policy.next_attempt_at(Utc::now(), payout.retry_count as u32));
                let updated = self
                    .payouts
                    .mark_failed(payout.id, &reason, retryable, next_retry_at)
                    .await?;

                if !retryable {
                    self.notify_terminal_failure(&updated).await;
                }
                Ok(Some(updated))
            }
            PayoutStatus::Pending | PayoutStatus::Processing => Ok(None),
        }
    }

    /// Re-attempt a failed payout inside the retry budget. Appends the
    /// attempt to the history before dispatching so the count survives a
    /// crash mid-attempt.
    pub async fn retry_payout(&self, payout: &Payout) -> Result<Payout, PayoutError> {
        let attempt = json!({
            "attempt": payout.retry_count + 1,
            "at": Utc::now().to_rfc3339(),
            "previous_error": payout.failure_reason,
        });
        let counted = self.payouts.record_retry_attempt(payout.id, attempt).await?;

        info!(
            payout_id = %payout.id,
            attempt = counted.retry_count,
            "retrying failed payout"
        );

        let updated = self
            .dispatch_disbursement(&counted, &counted.booking_id)
            .await?;

        // Exhausted the budget on a failure: annotate terminally and fire
        // the single final notification.
        if updated.status == "failed"
            && self
                .retry_policy
                .attempts_exhausted(updated.retry_count as u32)
        {
            let reason = updated
                .failure_reason
                .clone()
                .unwrap_or_else(|| "retry budget exhausted".to_string());
            let terminal = self
                .payouts
                .mark_failed(
                    updated.id,
                    &format!("{} (retry budget exhausted)", reason),
                    false,
                    None,
                )
                .await?;
            self.notify_terminal_failure(&terminal).await;
            return Ok(terminal);
        }

        Ok(updated)
    }

    async fn notify_terminal_failure(&self, payout: &Payout) {
        if let Ok(Some(booking)) = self.bookings.find_by_id(payout.booking_id).await {
            self.notifier
                .notify_driver(
                    &booking,
                    payout.driver_id,
                    NotificationType::PayoutFailed,
                    "We could not deliver your earnings. Support has been notified.",
                )
                .await;
        }
    }
}
