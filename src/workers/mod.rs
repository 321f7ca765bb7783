pub mod payment_reconciliation;
pub mod payout_reconciliation;
pub mod payout_retry;
pub mod refund_reconciliation;
