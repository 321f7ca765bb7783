use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    validate_amount, ChargeRequest, DisbursementRequest, PaymentStatus, PaymentStatusCheck,
    PayoutStatus, PayoutStatusCheck, ProviderName, ProviderReceipt, RefundRequest, WebhookEvent,
    WebhookVerificationResult,
};
use crate::payments::utils::{normalize_msisdn, verify_hmac_sha256_hex, ProviderHttpClient};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MtnConfig {
    pub base_url: String,
    pub subscription_key: String,
    pub api_user: String,
    pub api_key: String,
    pub target_environment: String,
    pub webhook_secret: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl MtnConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let subscription_key = std::env::var("MTN_SUBSCRIPTION_KEY").unwrap_or_default();
        let api_user = std::env::var("MTN_API_USER").unwrap_or_default();
        let api_key = std::env::var("MTN_API_KEY").unwrap_or_default();
        if subscription_key.is_empty() || api_user.is_empty() || api_key.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "MTN_SUBSCRIPTION_KEY, MTN_API_USER and MTN_API_KEY are required"
                    .to_string(),
                field: Some("mtn".to_string()),
            });
        }

        Ok(Self {
            base_url: std::env::var("MTN_BASE_URL")
                .unwrap_or_else(|_| "https://proxy.momoapi.mtn.com".to_string()),
            subscription_key,
            api_user,
            api_key,
            target_environment: std::env::var("MTN_TARGET_ENVIRONMENT")
                .unwrap_or_else(|_| "mtncameroon".to_string()),
            webhook_secret: std::env::var("MTN_WEBHOOK_SECRET").ok(),
            timeout_secs: std::env::var("MTN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("MTN_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MtnTokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct MtnTransactionStatus {
    status: String,
    #[serde(default)]
    reason: Option<JsonValue>,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct MtnProvider {
    config: MtnConfig,
    http: ProviderHttpClient,
    token: RwLock<Option<CachedToken>>,
}

impl MtnProvider {
    pub fn new(config: MtnConfig) -> PaymentResult<Self> {
        let http =
            ProviderHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self {
            config,
            http,
            token: RwLock::new(None),
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MtnConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// MTN tokens live for ~1h; re-use until shortly before expiry.
    async fn access_token(&self, product: &str) -> PaymentResult<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Utc::now() {
                    return Ok(token.token.clone());
                }
            }
        }

        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.config.api_user, self.config.api_key));
        let auth_header = format!("Basic {}", basic);
        let response: MtnTokenResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/{}/token/", product)),
                None,
                None,
                &[
                    ("Authorization", auth_header.as_str()),
                    ("Ocp-Apim-Subscription-Key", self.config.subscription_key.as_str()),
                ],
            )
            .await?;

        let expires_at =
            Utc::now() + ChronoDuration::seconds((response.expires_in - 60).max(60));
        let mut cached = self.token.write().await;
        *cached = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at,
        });
        Ok(response.access_token)
    }

    async fn fetch_status(&self, product: &str, reference: &str) -> PaymentResult<(String, Option<String>, JsonValue)> {
        let kind = if product == "collection" {
            "requesttopay"
        } else {
            "transfer"
        };
        let token = self.access_token(product).await?;
        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/{}/v1_0/{}/{}", product, kind, reference)),
                Some(&token),
                None,
                &[
                    ("Ocp-Apim-Subscription-Key", self.config.subscription_key.as_str()),
                    ("X-Target-Environment", self.config.target_environment.as_str()),
                ],
            )
            .await?;

        let parsed: MtnTransactionStatus = serde_json::from_value(raw.clone()).map_err(|e| {
            PaymentError::ProviderError {
                provider: "mtn".to_string(),
                message: format!("unexpected status payload: {}", e),
                provider_code: None,
                retryable: false,
            }
        })?;
        Ok((parsed.status, extract_reason(parsed.reason.as_ref()), raw))
    }
}

/// MTN reason field is either a bare string or `{code, message}`.
fn extract_reason(reason: Option<&JsonValue>) -> Option<String> {
    match reason? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Object(map) => map
            .get("message")
            .and_then(|v| v.as_str())
            .or_else(|| map.get("code").and_then(|v| v.as_str()))
            .map(|s| s.to_string()),
        _ => None,
    }
}

/// Total mapping of MTN's collection vocabulary into the payment domain.
/// Anything unrecognized stays non-terminal so reconciliation keeps polling.
pub fn map_mtn_payment_status(raw: &str) -> PaymentStatus {
    match raw.trim().to_uppercase().as_str() {
        "SUCCESSFUL" => PaymentStatus::Completed,
        "FAILED" | "REJECTED" | "TIMEOUT" => PaymentStatus::Failed,
        "CANCELLED" | "CANCELED" => PaymentStatus::Cancelled,
        "PENDING" | "CREATED" | "ONGOING" => PaymentStatus::Processing,
        _ => PaymentStatus::Processing,
    }
}

pub fn map_mtn_payout_status(raw: &str) -> PayoutStatus {
    match raw.trim().to_uppercase().as_str() {
        "SUCCESSFUL" => PayoutStatus::Completed,
        "FAILED" | "REJECTED" | "TIMEOUT" => PayoutStatus::Failed,
        "PENDING" | "CREATED" | "ONGOING" => PayoutStatus::Processing,
        _ => PayoutStatus::Processing,
    }
}

#[async_trait]
impl PaymentProvider for MtnProvider {
    async fn request_payment(&self, request: ChargeRequest) -> PaymentResult<ProviderReceipt> {
        validate_amount(&request.amount, "amount")?;
        let msisdn = normalize_msisdn(&request.phone_number)?;
        let reference = Uuid::new_v4().to_string();
        let token = self.access_token("collection").await?;

        let payload = json!({
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "externalId": request.reference,
            "payer": {"partyIdType": "MSISDN", "partyId": msisdn},
            "payerMessage": request.description.clone().unwrap_or_else(|| "Ride booking payment".to_string()),
            "payeeNote": request.reference,
        });

        self.http
            .request_accepted(
                reqwest::Method::POST,
                &self.endpoint("/collection/v1_0/requesttopay"),
                Some(&token),
                Some(&payload),
                &[
                    ("X-Reference-Id", reference.as_str()),
                    ("X-Target-Environment", self.config.target_environment.as_str()),
                    ("Ocp-Apim-Subscription-Key", self.config.subscription_key.as_str()),
                ],
            )
            .await?;

        info!(reference = %reference, external_id = %request.reference, "mtn request-to-pay accepted");
        Ok(ProviderReceipt {
            transaction_id: reference,
            message: None,
            api_response: None,
        })
    }

    async fn check_payment(&self, transaction_id: &str) -> PaymentResult<PaymentStatusCheck> {
        let (raw_status, reason, raw) = self.fetch_status("collection", transaction_id).await?;
        Ok(PaymentStatusCheck {
            status: map_mtn_payment_status(&raw_status),
            raw_status,
            failure_reason: reason,
            api_response: Some(raw),
        })
    }

    async fn disburse(&self, request: DisbursementRequest) -> PaymentResult<ProviderReceipt> {
        validate_amount(&request.amount, "amount")?;
        let msisdn = normalize_msisdn(&request.phone_number)?;
        let reference = Uuid::new_v4().to_string();
        let token = self.access_token("disbursement").await?;

        let payload = json!({
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "externalId": request.reference,
            "payee": {"partyIdType": "MSISDN", "partyId": msisdn},
            "payerMessage": request.reason.clone().unwrap_or_else(|| "Driver earnings".to_string()),
            "payeeNote": request.reference,
        });

        self.http
            .request_accepted(
                reqwest::Method::POST,
                &self.endpoint("/disbursement/v1_0/transfer"),
                Some(&token),
                Some(&payload),
                &[
                    ("X-Reference-Id", reference.as_str()),
                    ("X-Target-Environment", self.config.target_environment.as_str()),
                    ("Ocp-Apim-Subscription-Key", self.config.subscription_key.as_str()),
                ],
            )
            .await?;

        info!(reference = %reference, external_id = %request.reference, "mtn transfer accepted");
        Ok(ProviderReceipt {
            transaction_id: reference,
            message: None,
            api_response: None,
        })
    }

    async fn check_payout_status(&self, transaction_id: &str) -> PaymentResult<PayoutStatusCheck> {
        let (raw_status, reason, raw) = self.fetch_status("disbursement", transaction_id).await?;
        Ok(PayoutStatusCheck {
            status: map_mtn_payout_status(&raw_status),
            raw_status,
            failure_reason: reason,
            api_response: Some(raw),
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<ProviderReceipt> {
        validate_amount(&request.amount, "amount")?;
        let reference = Uuid::new_v4().to_string();
        let token = self.access_token("disbursement").await?;

        let payload = json!({
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "externalId": request.reference,
            "payerMessage": "Booking refund",
            "payeeNote": request.reference,
            "referenceIdToRefund": request.original_transaction_id,
        });

        self.http
            .request_accepted(
                reqwest::Method::POST,
                &self.endpoint("/disbursement/v1_0/refund"),
                Some(&token),
                Some(&payload),
                &[
                    ("X-Reference-Id", reference.as_str()),
                    ("X-Target-Environment", self.config.target_environment.as_str()),
                    ("Ocp-Apim-Subscription-Key", self.config.subscription_key.as_str()),
                ],
            )
            .await?;

        info!(reference = %reference, refunded = %request.original_transaction_id, "mtn refund accepted");
        Ok(ProviderReceipt {
            transaction_id: reference,
            message: None,
            api_response: None,
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Mtn
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["XAF"]
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
            .get("referenceId")
            .or_else(|| parsed.get("financialTransactionId"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(WebhookEvent {
            provider: ProviderName::Mtn,
            event_type: format!("mtn.requesttopay.{}", raw_status.to_lowercase()),
            transaction_id,
            status: if raw_status.is_empty() {
                None
            } else {
                Some(map_mtn_payment_status(&raw_status))
            },
            payload: parsed,
            received_at: Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_mapping_is_total() {
        assert_eq!(map_mtn_payment_status("SUCCESSFUL"), PaymentStatus::Completed);
        assert_eq!(map_mtn_payment_status("FAILED"), PaymentStatus::Failed);
        assert_eq!(map_mtn_payment_status("TIMEOUT"), PaymentStatus::Failed);
        assert_eq!(map_mtn_payment_status("PENDING"), PaymentStatus::Processing);
        // Unknown vocabulary must stay non-terminal, never complete a payment.
        assert_eq!(
            map_mtn_payment_status("SOMETHING_NEW"),
            PaymentStatus::Processing
        );
        assert_eq!(map_mtn_payment_status(""), PaymentStatus::Processing);
    }

    #[test]
    fn payout_status_mapping_handles_case_and_whitespace() {
        assert_eq!(map_mtn_payout_status(" successful "), PayoutStatus::Completed);
        assert_eq!(map_mtn_payout_status("rejected"), PayoutStatus::Failed);
        assert_eq!(map_mtn_payout_status("ONGOING"), PayoutStatus::Processing);
    }

    #[test]
    fn reason_extraction_handles_both_shapes() {
        assert_eq!(
            extract_reason(Some(&json!("PAYER_NOT_FOUND"))),
            Some("PAYER_NOT_FOUND".to_string())
        );
        assert_eq!(
            extract_reason(Some(&json!({"code": "INTERNAL_PROCESSING_ERROR", "message": "try later"}))),
            Some("try later".to_string())
        );
        assert_eq!(extract_reason(None), None);
    }

    #[test]
    fn webhook_event_extracts_reference_and_status() {
        let config = MtnConfig {
            base_url: "https://example.test".to_string(),
            subscription_key: "sub".to_string(),
            api_user: "user".to_string(),
            api_key: "key".to_string(),
            target_environment: "sandbox".to_string(),
            webhook_secret: None,
            timeout_secs: 5,
            max_retries: 0,
        };
        let provider = MtnProvider::new(config).expect("provider builds");

        let body = serde_json::to_vec(&json!({
            "referenceId": "ab2f9e54-2b1c-4dd9-bb8e-3f4a6a1d2c3b",
            "status": "SUCCESSFUL",
            "amount": "1500"
        }))
        .expect("serializable");
        let event = provider.parse_webhook_event(&body).expect("parses");
        assert_eq!(event.status, Some(PaymentStatus::Completed));
        assert_eq!(
            event.transaction_id.as_deref(),
            Some("ab2f9e54-2b1c-4dd9-bb8e-3f4a6a1d2c3b")
        );
    }
}
