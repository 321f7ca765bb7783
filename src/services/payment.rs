use crate::database::error::DatabaseError;
use crate::database::payment_repository::{NewPayment, Payment, PaymentRepository};
use crate::payments::error::PaymentError;
use crate::payments::types::{validate_amount, PaymentStatus};
use crate::payments::utils::normalize_msisdn;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PaymentServiceError {
    /// The requested transition is not in the state machine. Raised before
    /// any write happens.
    #[error("illegal payment status transition {from} -> {to}")]
    IllegalTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("payment {0} not found")]
    NotFound(Uuid),

    #[error("payment {id} carries unknown status '{status}'")]
    CorruptStatus { id: Uuid, status: String },

    #[error(transparent)]
    Validation(#[from] PaymentError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// CRUD plus transition enforcement for payment records. The transition
/// table on `PaymentStatus` is consulted here and nowhere else.
pub struct PaymentService {
    repo: PaymentRepository,
}

impl PaymentService {
    pub fn new(repo: PaymentRepository) -> Self {
        Self { repo }
    }

    /// Idempotent creation: retried client requests with the same
    /// idempotency key get the original row back.
    pub async fn create_payment(&self, mut new: NewPayment) -> Result<Payment, PaymentServiceError> {
        validate_amount(&new.amount, "amount")?;
        new.phone_number = normalize_msisdn(&new.phone_number)?;
        if new.idempotency_key.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "idempotency_key is required".to_string(),
                field: Some("idempotency_key".to_string()),
            }
            .into());
        }

        let payment = self.repo.create(new).await?;
        info!(
            payment_id = %payment.id,
            booking_id = %payment.booking_id,
            provider = %payment.provider,
            "payment record ready"
        );
        Ok(payment)
    }

    pub async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, PaymentServiceError> {
        Ok(self.repo.find_by_id(id).await?)
    }

    pub async fn get_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, PaymentServiceError> {
        Ok(self.repo.find_by_transaction_id(transaction_id).await?)
    }

    pub async fn list_by_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<Payment>, PaymentServiceError> {
        Ok(self.repo.list_by_booking(booking_id).await?)
    }

    pub async fn set_transaction_id(
        &self,
        id: Uuid,
        transaction_id: &str,
    ) -> Result<Payment, PaymentServiceError> {
        Ok(self.repo.set_transaction_id(id, transaction_id).await?)
    }

    pub fn validate_state_transition(
        current: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<(), PaymentServiceError> {
        if current.can_transition_to(next) {
            Ok(())
        } else {
            Err(PaymentServiceError::IllegalTransition {
                from: current,
                to: next,
            })
        }
    }

    /// Validated status update. Rejects illegal transitions before any
    /// mutation; `completed` stamps payment_time in the same statement.
    pub async fn update_payment_status(
        &self,
        id: Uuid,
        new_status: PaymentStatus,
        metadata: serde_json::Value,
    ) -> Result<Payment, PaymentServiceError> {
        let payment = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or(PaymentServiceError::NotFound(id))?;
        let current = payment
            .status()
            .ok_or_else(|| PaymentServiceError::CorruptStatus {
                id,
                status: payment.status.clone(),
            })?;

        Self::validate_state_transition(current, new_status)?;

        let updated = self.repo.update_status(id, new_status, metadata).await?;
        info!(
            payment_id = %id,
            from = %current,
            to = %new_status,
            "payment status updated"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transitions_are_rejected_with_the_pair() {
        let err = PaymentService::validate_state_transition(
            PaymentStatus::Completed,
            PaymentStatus::Processing,
        )
        .expect_err("completed -> processing is illegal");
        match err {
            PaymentServiceError::IllegalTransition { from, to } => {
                assert_eq!(from, PaymentStatus::Completed);
                assert_eq!(to, PaymentStatus::Processing);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn every_entry_in_the_table_is_accepted() {
        let legal = [
            (PaymentStatus::Pending, PaymentStatus::Processing),
            (PaymentStatus::Pending, PaymentStatus::Failed),
            (PaymentStatus::Pending, PaymentStatus::Cancelled),
            (PaymentStatus::Processing, PaymentStatus::Completed),
            (PaymentStatus::Processing, PaymentStatus::Failed),
            (PaymentStatus::Completed, PaymentStatus::Refunded),
        ];
        for (from, to) in legal {
            assert!(
                PaymentService::validate_state_transition(from, to).is_ok(),
                "{from} -> {to} must be legal"
            );
        }
    }

    #[test]
    fn self_transition_is_not_in_the_table() {
        assert!(PaymentService::validate_state_transition(
            PaymentStatus::Processing,
            PaymentStatus::Processing
        )
        .is_err());
    }
}
