use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    validate_amount, ChargeRequest, DisbursementRequest, PaymentStatus, PaymentStatusCheck,
    PayoutStatus, PayoutStatusCheck, ProviderName, ProviderReceipt, RefundRequest, WebhookEvent,
    WebhookVerificationResult,
};
use crate::payments::utils::{normalize_msisdn, verify_hmac_sha256_hex, ProviderHttpClient};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PawapayConfig {
    pub base_url: String,
    pub api_token: String,
    pub correspondent: String,
    pub webhook_secret: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl PawapayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let api_token =
            std::env::var("PAWAPAY_API_TOKEN").map_err(|_| PaymentError::ValidationError {
                message: "PAWAPAY_API_TOKEN environment variable is required".to_string(),
                field: Some("PAWAPAY_API_TOKEN".to_string()),
            })?;

        Ok(Self {
            base_url: std::env::var("PAWAPAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.pawapay.cloud".to_string()),
            api_token,
            correspondent: std::env::var("PAWAPAY_CORRESPONDENT")
                .unwrap_or_else(|_| "MTN_MOMO_CMR".to_string()),
            webhook_secret: std::env::var("PAWAPAY_WEBHOOK_SECRET").ok(),
            timeout_secs: std::env::var("PAWAPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("PAWAPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
        })
    }
}

pub struct PawapayProvider {
    config: PawapayConfig,
    http: ProviderHttpClient,
}

impl PawapayProvider {
    pub fn new(config: PawapayConfig) -> PaymentResult<Self> {
        let http =
            ProviderHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PawapayConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn fetch_record(&self, kind: &str, id: &str) -> PaymentResult<JsonValue> {
        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/{}/{}", kind, id)),
                Some(&self.config.api_token),
                None,
                &[],
            )
            .await?;
        // pawaPay wraps single-record lookups in a one-element array.
        Ok(match raw {
            JsonValue::Array(mut items) if !items.is_empty() => items.remove(0),
            other => other,
        })
    }

    fn acceptance_receipt(
        &self,
        id: String,
        raw: JsonValue,
        operation: &str,
    ) -> PaymentResult<ProviderReceipt> {
        let status = raw
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_uppercase();
        if status == "REJECTED" {
            let reason = raw
                .get("rejectionReason")
                .map(|v| v.to_string())
                .unwrap_or_else(|| "rejected by pawapay".to_string());
            return Err(PaymentError::ProviderError {
                provider: "pawapay".to_string(),
                message: format!("{} rejected: {}", operation, reason),
                provider_code: Some(status),
                retryable: false,
            });
        }
        Ok(ProviderReceipt {
            transaction_id: id,
            message: Some(status),
            api_response: Some(raw),
        })
    }
}

/// pawaPay enum → payment domain. `DUPLICATE_IGNORED` means the request was
/// already accepted once; treat it as still in flight and let reconciliation
/// resolve the real outcome.
pub fn map_pawapay_payment_status(raw: &str) -> PaymentStatus {
    match raw.trim().to_uppercase().as_str() {
        "COMPLETED" => PaymentStatus::Completed,
        "FAILED" | "REJECTED" => PaymentStatus::Failed,
        "CANCELLED" | "CANCELED" => PaymentStatus::Cancelled,
        "ACCEPTED" | "SUBMITTED" | "ENQUEUED" | "PENDING" | "DUPLICATE_IGNORED" => {
            PaymentStatus::Processing
        }
        _ => PaymentStatus::Processing,
    }
}

pub fn map_pawapay_payout_status(raw: &str) -> PayoutStatus {
    match raw.trim().to_uppercase().as_str() {
        "COMPLETED" => PayoutStatus::Completed,
        "FAILED" | "REJECTED" => PayoutStatus::Failed,
        "ACCEPTED" | "SUBMITTED" | "ENQUEUED" | "PENDING" | "DUPLICATE_IGNORED" => {
            PayoutStatus::Processing
        }
        _ => PayoutStatus::Processing,
    }
}

fn extract_failure_reason(record: &JsonValue) -> Option<String> {
    record
        .get("failureReason")
        .and_then(|v| {
            v.get("failureMessage")
                .or_else(|| v.get("failureCode"))
                .and_then(|m| m.as_str())
        })
        .map(|s| s.to_string())
        .or_else(|| {
            record
                .get("rejectionReason")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
}

#[async_trait]
impl PaymentProvider for PawapayProvider {
    async fn request_payment(&self, request: ChargeRequest) -> PaymentResult<ProviderReceipt> {
        validate_amount(&request.amount, "amount")?;
        let msisdn = normalize_msisdn(&request.phone_number)?;
        let deposit_id = Uuid::new_v4().to_string();

        let payload = json!({
            "depositId": deposit_id,
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "correspondent": self.config.correspondent,
            "payer": {"type": "MSISDN", "address": {"value": msisdn}},
            "statementDescription": request.description.clone().unwrap_or_else(|| "Ride booking".to_string()),
            "metadata": [{"fieldName": "reference", "fieldValue": request.reference}],
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/deposits"),
                Some(&self.config.api_token),
                Some(&payload),
                &[],
            )
            .await?;

        info!(deposit_id = %deposit_id, reference = %request.reference, "pawapay deposit submitted");
        self.acceptance_receipt(deposit_id, raw, "deposit")
    }

    async fn check_payment(&self, transaction_id: &str) -> PaymentResult<PaymentStatusCheck> {
        let record = self.fetch_record("deposits", transaction_id).await?;
        let raw_status = record
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(PaymentStatusCheck {
            status: map_pawapay_payment_status(&raw_status),
            raw_status,
            failure_reason: extract_failure_reason(&record),
            api_response: Some(record),
        })
    }

    async fn disburse(&self, request: DisbursementRequest) -> PaymentResult<ProviderReceipt> {
        validate_amount(&request.amount, "amount")?;
        let msisdn = normalize_msisdn(&request.phone_number)?;
        let payout_id = Uuid::new_v4().to_string();

        let payload = json!({
            "payoutId": payout_id,
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "correspondent": self.config.correspondent,
            "recipient": {"type": "MSISDN", "address": {"value": msisdn}},
            "statementDescription": request.reason.clone().unwrap_or_else(|| "Driver earnings".to_string()),
            "metadata": [{"fieldName": "reference", "fieldValue": request.reference}],
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/payouts"),
                Some(&self.config.api_token),
                Some(&payload),
                &[],
            )
            .await?;

        info!(payout_id = %payout_id, reference = %request.reference, "pawapay payout submitted");
        self.acceptance_receipt(payout_id, raw, "payout")
    }

    async fn check_payout_status(&self, transaction_id: &str) -> PaymentResult<PayoutStatusCheck> {
        let record = self.fetch_record("payouts", transaction_id).await?;
        let raw_status = record
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(PayoutStatusCheck {
            status: map_pawapay_payout_status(&raw_status),
            raw_status,
            failure_reason: extract_failure_reason(&record),
            api_response: Some(record),
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<ProviderReceipt> {
        validate_amount(&request.amount, "amount")?;
        let refund_id = Uuid::new_v4().to_string();

        let payload = json!({
            "refundId": refund_id,
            "depositId": request.original_transaction_id,
            "amount": request.amount.to_string(),
            "metadata": [{"fieldName": "reference", "fieldValue": request.reference}],
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/refunds"),
                Some(&self.config.api_token),
                Some(&payload),
                &[],
            )
            .await?;

        info!(refund_id = %refund_id, deposit_id = %request.original_transaction_id, "pawapay refund submitted");
        self.acceptance_receipt(refund_id, raw, "refund")
    }

    fn name(&self) -> ProviderName {
        ProviderName::Pawapay
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["XAF", "XOF", "KES", "UGX"]
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        match self.config.webhook_secret.as_deref() {
            Some(secret) => Ok(WebhookVerificationResult {
                valid: verify_hmac_sha256_hex(payload, secret, signature),
                reason: None,
            }),
            None => Ok(WebhookVerificationResult {
                valid: true,
                reason: Some("signature verification disabled".to_string()),
            }),
        }
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let parsed: JsonValue = serde_json::from_slice(payload).unwrap_or_else(|_| json!({}));
        let raw_status = parsed
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let transaction_id = parsed
            .get("depositId")
            .or_else(|| parsed.get("payoutId"))
            .or_else(|| parsed.get("refundId"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let kind = if parsed.get("payoutId").is_some() {
            "payout"
        } else if parsed.get("refundId").is_some() {
            "refund"
        } else {
            "deposit"
        };

        Ok(WebhookEvent {
            provider: ProviderName::Pawapay,
            event_type: format!("pawapay.{}.{}", kind, raw_status.to_lowercase()),
            transaction_id,
            status: if raw_status.is_empty() {
                None
            } else {
                Some(map_pawapay_payment_status(&raw_status))
            },
            payload: parsed,
            received_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_status_mapping_is_total() {
        assert_eq!(
            map_pawapay_payment_status("COMPLETED"),
            PaymentStatus::Completed
        );
        assert_eq!(map_pawapay_payment_status("REJECTED"), PaymentStatus::Failed);
        assert_eq!(
            map_pawapay_payment_status("DUPLICATE_IGNORED"),
            PaymentStatus::Processing
        );
        assert_eq!(
            map_pawapay_payment_status("ENQUEUED"),
            PaymentStatus::Processing
        );
        assert_eq!(
            map_pawapay_payment_status("not-in-the-docs"),
            PaymentStatus::Processing
        );
    }

    #[test]
    fn failure_reason_prefers_structured_field() {
        let record = json!({
            "status": "FAILED",
            "failureReason": {"failureCode": "PAYER_LIMIT_REACHED", "failureMessage": "Wallet limit reached"}
        });
        assert_eq!(
            extract_failure_reason(&record),
            Some("Wallet limit reached".to_string())
        );

        let rejected = json!({"status": "REJECTED", "rejectionReason": "INVALID_PAYER_FORMAT"});
        assert_eq!(
            extract_failure_reason(&rejected),
            Some("INVALID_PAYER_FORMAT".to_string())
        );
    }

    #[test]
    fn webhook_event_distinguishes_deposits_and_payouts() {
        let config = PawapayConfig {
            base_url: "https://example.test".to_string(),
            api_token: "token".to_string(),
            correspondent: "MTN_MOMO_CMR".to_string(),
            webhook_secret: None,
            timeout_secs: 5,
            max_retries: 0,
        };
        let provider = PawapayProvider::new(config).expect("provider builds");

        let deposit = serde_json::to_vec(&json!({"depositId": "d-1", "status": "COMPLETED"}))
            .expect("serializable");
        let event = provider.parse_webhook_event(&deposit).expect("parses");
        assert_eq!(event.event_type, "pawapay.deposit.completed");
        assert_eq!(event.transaction_id.as_deref(), Some("d-1"));

        let payout = serde_json::to_vec(&json!({"payoutId": "p-1", "status": "FAILED"}))
            .expect("serializable");
        let event = provider.parse_webhook_event(&payout).expect("parses");
        assert_eq!(event.event_type, "pawapay.payout.failed");
    }
}
