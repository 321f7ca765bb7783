use crate::payments::error::PaymentResult;
use crate::payments::types::{
    ChargeRequest, DisbursementRequest, PaymentStatusCheck, PayoutStatusCheck, ProviderName,
    ProviderReceipt, RefundRequest, WebhookEvent, WebhookVerificationResult,
};
use async_trait::async_trait;

/// One implementation per mobile money operator. Every method returns a
/// normalized envelope; provider-native status vocabulary never leaks past
/// this boundary.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Ask the provider to collect `amount` from the rider's wallet.
    async fn request_payment(&self, request: ChargeRequest) -> PaymentResult<ProviderReceipt>;

    /// Poll the provider for the current state of a collection.
    async fn check_payment(&self, transaction_id: &str) -> PaymentResult<PaymentStatusCheck>;

    /// Disburse driver earnings to a wallet.
    async fn disburse(&self, request: DisbursementRequest) -> PaymentResult<ProviderReceipt>;

    /// Poll the provider for the current state of a disbursement.
    async fn check_payout_status(&self, transaction_id: &str) -> PaymentResult<PayoutStatusCheck>;

    /// Reverse a previously collected payment (full or partial).
    async fn refund(&self, request: RefundRequest) -> PaymentResult<ProviderReceipt>;

    fn name(&self) -> ProviderName;

    fn supported_currencies(&self) -> &'static [&'static str];

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::payments::types::{PaymentStatus, PayoutStatus};
    use serde_json::json;

    /// Scriptable provider double used by service and worker tests.
    pub struct ScriptedProvider {
        pub provider: ProviderName,
        pub payment_status: PaymentStatus,
        pub payout_status: PayoutStatus,
        pub payout_failure_reason: Option<String>,
        pub fail_disburse: bool,
        pub fail_refund: bool,
    }

    impl ScriptedProvider {
        pub fn completed(provider: ProviderName) -> Self {
            Self {
                provider,
                payment_status: PaymentStatus::Completed,
                payout_status: PayoutStatus::Completed,
                payout_failure_reason: None,
                fail_disburse: false,
                fail_refund: false,
            }
        }
    }

    #[async_trait]
    impl PaymentProvider for ScriptedProvider {
        async fn request_payment(
            &self,
            request: ChargeRequest,
        ) -> PaymentResult<ProviderReceipt> {
            Ok(ProviderReceipt {
                transaction_id: request.reference,
                message: None,
                api_response: None,
            })
        }

        async fn check_payment(
            &self,
            transaction_id: &str,
        ) -> PaymentResult<PaymentStatusCheck> {
            Ok(PaymentStatusCheck {
                status: self.payment_status,
                raw_status: self.payment_status.as_str().to_uppercase(),
                failure_reason: None,
                api_response: Some(json!({"transaction_id": transaction_id})),
            })
        }

        async fn disburse(
            &self,
            request: DisbursementRequest,
        ) -> PaymentResult<ProviderReceipt> {
            if self.fail_disburse {
                return Err(crate::payments::error::PaymentError::ProviderError {
                    provider: self.provider.as_str().to_string(),
                    message: "disbursement rejected".to_string(),
                    provider_code: None,
                    retryable: true,
                });
            }
            Ok(ProviderReceipt {
                transaction_id: request.reference,
                message: None,
                api_response: None,
            })
        }

        async fn check_payout_status(
            &self,
            transaction_id: &str,
        ) -> PaymentResult<PayoutStatusCheck> {
            Ok(PayoutStatusCheck {
                status: self.payout_status,
                raw_status: self.payout_status.as_str().to_uppercase(),
                failure_reason: self.payout_failure_reason.clone(),
                api_response: Some(json!({"transaction_id": transaction_id})),
            })
        }

        async fn refund(&self, request: RefundRequest) -> PaymentResult<ProviderReceipt> {
            if self.fail_refund {
                return Err(crate::payments::error::PaymentError::ProviderError {
                    provider: self.provider.as_str().to_string(),
                    message: "refund rejected".to_string(),
                    provider_code: None,
                    retryable: false,
                });
            }
            Ok(ProviderReceipt {
                transaction_id: request.reference,
                message: None,
                api_response: None,
            })
        }

        fn name(&self) -> ProviderName {
            self.provider.clone()
        }

        fn supported_currencies(&self) -> &'static [&'static str] {
            &["XAF"]
        }

        fn verify_webhook(
            &self,
            _payload: &[u8],
            _signature: &str,
        ) -> PaymentResult<WebhookVerificationResult> {
            Ok(WebhookVerificationResult {
                valid: true,
                reason: None,
            })
        }

        fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
            let parsed = serde_json::from_slice(payload).unwrap_or_else(|_| json!({}));
            Ok(WebhookEvent {
                provider: self.provider.clone(),
                event_type: "scripted".to_string(),
                transaction_id: None,
                status: Some(self.payment_status),
                payload: parsed,
                received_at: chrono::Utc::now().to_rfc3339(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedProvider;
    use super::*;
    use crate::payments::types::PaymentStatus;
    use bigdecimal::BigDecimal;

    #[tokio::test]
    async fn trait_can_be_implemented_by_scripted_provider() {
        let provider: Box<dyn PaymentProvider> =
            Box::new(ScriptedProvider::completed(ProviderName::Mtn));

        let receipt = provider
            .request_payment(ChargeRequest {
                amount: BigDecimal::from(1500),
                currency: "XAF".to_string(),
                phone_number: "237677123456".to_string(),
                reference: "pay_1".to_string(),
                description: None,
            })
            .await
            .expect("charge should succeed");
        assert_eq!(receipt.transaction_id, "pay_1");

        let check = provider
            .check_payment("pay_1")
            .await
            .expect("status check should succeed");
        assert_eq!(check.status, PaymentStatus::Completed);
    }
}
