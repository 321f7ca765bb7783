use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Mtn,
    Orange,
    Pawapay,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Mtn => "mtn",
            ProviderName::Orange => "orange",
            ProviderName::Pawapay => "pawapay",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mtn" | "mtn_momo" | "mtn-momo" => Ok(ProviderName::Mtn),
            "orange" | "orange_money" | "orange-money" => Ok(ProviderName::Orange),
            "pawapay" => Ok(ProviderName::Pawapay),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Status of a single payment attempt. Transitions are restricted to the
/// graph in `valid_transitions`; that table is the single source of truth
/// for legality; provider status mappers only propose a target status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[
                PaymentStatus::Processing,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Processing => &[PaymentStatus::Completed, PaymentStatus::Failed],
            PaymentStatus::Completed => &[PaymentStatus::Refunded],
            // Terminal states
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(PaymentError::ValidationError {
                message: format!("unknown payment status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Completed | PayoutStatus::Failed)
    }
}

impl std::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PayoutStatus::Pending),
            "processing" => Ok(PayoutStatus::Processing),
            "completed" => Ok(PayoutStatus::Completed),
            "failed" => Ok(PayoutStatus::Failed),
            _ => Err(PaymentError::ValidationError {
                message: format!("unknown payout status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Processing => "processing",
            RefundStatus::Completed => "completed",
            RefundStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RefundStatus::Completed | RefundStatus::Failed)
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RefundStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(RefundStatus::Pending),
            "processing" => Ok(RefundStatus::Processing),
            "completed" => Ok(RefundStatus::Completed),
            "failed" => Ok(RefundStatus::Failed),
            _ => Err(PaymentError::ValidationError {
                message: format!("unknown refund status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

pub fn validate_amount(amount: &BigDecimal, field: &str) -> Result<(), PaymentError> {
    if amount <= &BigDecimal::from(0) {
        return Err(PaymentError::ValidationError {
            message: "amount must be greater than zero".to_string(),
            field: Some(field.to_string()),
        });
    }
    Ok(())
}

/// Request to collect money from a rider's mobile money wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub amount: BigDecimal,
    pub currency: String,
    pub phone_number: String,
    /// Our reference (payment id), echoed back by the provider.
    pub reference: String,
    pub description: Option<String>,
}

/// Request to disburse driver earnings to a mobile money wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementRequest {
    pub amount: BigDecimal,
    pub currency: String,
    pub phone_number: String,
    pub reference: String,
    pub reason: Option<String>,
}

/// Request to reverse a previously collected payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub amount: BigDecimal,
    pub currency: String,
    pub phone_number: String,
    pub reference: String,
    /// Provider reference of the original collection being reversed.
    pub original_transaction_id: String,
}

/// Normalized acknowledgement for payin/payout/refund initiation. A
/// provider failure surfaces as `PaymentError`, never as a receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReceipt {
    pub transaction_id: String,
    pub message: Option<String>,
    pub api_response: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusCheck {
    pub status: PaymentStatus,
    pub raw_status: String,
    pub failure_reason: Option<String>,
    pub api_response: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutStatusCheck {
    pub status: PayoutStatus,
    pub raw_status: String,
    pub failure_reason: Option<String>,
    pub api_response: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: ProviderName,
    pub event_type: String,
    /// Provider transaction reference extracted from the payload.
    pub transaction_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub payload: JsonValue,
    pub received_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_state_machine() {
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
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "transition {} -> {} should be {}",
                    from,
                    to,
                    if expected { "legal" } else { "illegal" }
                );
            }
        }
    }

    #[test]
    fn completed_cannot_go_back_to_processing() {
        assert!(!PaymentStatus::Completed.can_transition_to(PaymentStatus::Processing));
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for status in [
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::Refunded,
        ] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(
                PaymentStatus::from_str(status.as_str()).expect("known status"),
                status
            );
        }
        assert!(PaymentStatus::from_str("success").is_err());
    }

    #[test]
    fn provider_name_parsing_accepts_aliases() {
        assert_eq!(
            ProviderName::from_str("MTN_MOMO").expect("alias"),
            ProviderName::Mtn
        );
        assert_eq!(
            ProviderName::from_str("orange-money").expect("alias"),
            ProviderName::Orange
        );
        assert!(ProviderName::from_str("paypal").is_err());
    }

    #[test]
    fn amount_validation_rejects_non_positive() {
        assert!(validate_amount(&BigDecimal::from(0), "amount").is_err());
        assert!(validate_amount(&BigDecimal::from(-500), "amount").is_err());
        assert!(validate_amount(&BigDecimal::from(1000), "amount").is_ok());
    }
}
