//! Cross-module properties of the payment/booking core, exercised through
//! the crate's public API.

use bigdecimal::BigDecimal;
use saferide_backend::payments::providers::mtn::{map_mtn_payment_status, map_mtn_payout_status};
use saferide_backend::payments::providers::orange::map_orange_payment_status;
use saferide_backend::payments::providers::pawapay::map_pawapay_payment_status;
use saferide_backend::payments::types::{PaymentStatus, PayoutStatus};
use saferide_backend::services::fees::FeeCalculator;
use saferide_backend::services::orchestrator::{transition_decision, TransitionDecision};
use saferide_backend::services::payment::{PaymentService, PaymentServiceError};
use saferide_backend::services::retry::{should_retry_payout, RetryPolicy};

#[test]
fn the_transition_table_is_closed() {
    use PaymentStatus::*;
    let all = [Pending, Processing, Completed, Failed, Cancelled, Refunded];
    let legal = [
        (Pending, Processing),
        (Pending, Failed),
        (Pending, Cancelled),
        (Processing, Completed),
        (Processing, Failed),
        (Completed, Refunded),
    ];

    for from in all {
        for to in all {
            let allowed = PaymentService::validate_state_transition(from, to).is_ok();
            assert_eq!(
                allowed,
                legal.contains(&(from, to)),
                "{from} -> {to} classified incorrectly"
            );
        }
    }
}

#[test]
fn completed_to_processing_is_rejected_with_the_offending_pair() {
    let err = PaymentService::validate_state_transition(
        PaymentStatus::Completed,
        PaymentStatus::Processing,
    )
    .expect_err("must be rejected");
    match err {
        PaymentServiceError::IllegalTransition { from, to } => {
            assert_eq!(from, PaymentStatus::Completed);
            assert_eq!(to, PaymentStatus::Processing);
        }
        other => panic!("wrong error kind: {other}"),
    }
}

#[test]
fn redelivered_statuses_short_circuit_before_side_effects() {
    // Same trigger from webhook or sweep: already-applied statuses are a
    // no-op, not an illegal-transition error.
    for status in [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
    ] {
        assert_eq!(
            transition_decision(status, status),
            TransitionDecision::AlreadyApplied
        );
    }
}

#[test]
fn provider_mappings_are_total_and_never_invent_success() {
    // Unknown vocabulary from any provider stays non-terminal.
    for weird in ["", "???", "NEW_STATE_2027", "success "] {
        assert_ne!(map_mtn_payment_status(weird), PaymentStatus::Completed);
        assert_ne!(map_orange_payment_status(weird), PaymentStatus::Completed);
        assert_ne!(map_pawapay_payment_status(weird), PaymentStatus::Completed);
    }

    // Success vocabulary, including Orange's SUCCESSFULL typo, maps to
    // completed.
    assert_eq!(map_mtn_payment_status("SUCCESSFUL"), PaymentStatus::Completed);
    assert_eq!(
        map_orange_payment_status("SUCCESSFULL"),
        PaymentStatus::Completed
    );
    assert_eq!(
        map_pawapay_payment_status("COMPLETED"),
        PaymentStatus::Completed
    );
    assert_eq!(map_mtn_payout_status("SUCCESSFUL"), PayoutStatus::Completed);
}

#[test]
fn driver_earnings_for_a_3000_xaf_booking() {
    // 2% transaction fee + 8% commission on 3 seats at 1000 XAF.
    let breakdown = FeeCalculator::new(200, 800).calculate(&BigDecimal::from(3000));
    assert_eq!(breakdown.transaction_fee, BigDecimal::from(60));
    assert_eq!(breakdown.commission, BigDecimal::from(240));
    assert_eq!(breakdown.net, BigDecimal::from(2700));
}

#[test]
fn seat_reduction_scenario_refunds_the_delta() {
    use saferide_backend::database::booking_repository::BookingPaymentStatus;
    use saferide_backend::database::refund_repository::RefundType;
    use saferide_backend::services::cancellation::{
        restored_payment_status, seat_reduction_refund_amount,
    };

    // Booking with 3 seats at 1000 XAF fully paid, then reduced to 1 seat.
    let refund = seat_reduction_refund_amount(&BigDecimal::from(1000), 3, 1);
    assert_eq!(refund, BigDecimal::from(2000));

    // Once the provider confirms the refund, the booking's payment state
    // reflects the partial refund.
    assert_eq!(
        restored_payment_status(Some(BookingPaymentStatus::Completed), RefundType::Partial),
        Some(BookingPaymentStatus::PartialRefund)
    );
}

#[test]
fn a_payout_with_three_attempts_is_never_retried_again() {
    let policy = RetryPolicy::new(3, 300);
    assert!(policy.attempts_exhausted(3));
    // A transient reason alone is not enough once the budget is spent.
    assert!(should_retry_payout(Some("TIMEOUT")));
    assert!(policy.attempts_exhausted(3) || !should_retry_payout(Some("TIMEOUT")));
}

#[test]
fn permanent_payout_failures_skip_the_retry_queue_immediately() {
    assert!(!should_retry_payout(Some("INVALID_PAYEE")));
    assert!(!should_retry_payout(Some("ACCOUNT_NOT_FOUND")));
    assert!(should_retry_payout(Some("INSUFFICIENT_BALANCE")));
}
