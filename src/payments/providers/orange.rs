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
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrangeConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub merchant_msisdn: String,
    pub pin: String,
    pub webhook_secret: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl OrangeConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let client_id = std::env::var("ORANGE_CLIENT_ID").unwrap_or_default();
        let client_secret = std::env::var("ORANGE_CLIENT_SECRET").unwrap_or_default();
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "ORANGE_CLIENT_ID and ORANGE_CLIENT_SECRET are required".to_string(),
                field: Some("orange".to_string()),
            });
        }

        Ok(Self {
            base_url: std::env::var("ORANGE_BASE_URL")
                .unwrap_or_else(|_| "https://api-s1.orange.cm".to_string()),
            client_id,
            client_secret,
            merchant_msisdn: std::env::var("ORANGE_MERCHANT_MSISDN").unwrap_or_default(),
            pin: std::env::var("ORANGE_MERCHANT_PIN").unwrap_or_default(),
            webhook_secret: std::env::var("ORANGE_WEBHOOK_SECRET").ok(),
            timeout_secs: std::env::var("ORANGE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("ORANGE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OrangeTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct OrangeEnvelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<JsonValue>,
}

pub struct OrangeProvider {
    config: OrangeConfig,
    http: ProviderHttpClient,
}

impl OrangeProvider {
    pub fn new(config: OrangeConfig) -> PaymentResult<Self> {
        let http =
            ProviderHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(OrangeConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn access_token(&self) -> PaymentResult<String> {
        let basic = base64::engine::general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.config.client_id, self.config.client_secret
        ));
        let auth_header = format!("Basic {}", basic);
        let response: OrangeTokenResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/token"),
                None,
                Some(&json!({"grant_type": "client_credentials"})),
                &[("Authorization", auth_header.as_str())],
            )
            .await?;
        Ok(response.access_token)
    }

    fn data_field<'a>(data: Option<&'a JsonValue>, key: &str) -> Option<&'a str> {
        data?.get(key)?.as_str()
    }

    async fn fetch_status(&self, pay_token: &str) -> PaymentResult<(String, Option<String>, JsonValue)> {
        let token = self.access_token().await?;
        let raw: OrangeEnvelope = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/omcoreapis/1.0.2/mp/paymentstatus/{}", pay_token)),
                Some(&token),
                None,
                &[],
            )
            .await?;

        let status = Self::data_field(raw.data.as_ref(), "status")
            .unwrap_or_default()
            .to_string();
        let reason = Self::data_field(raw.data.as_ref(), "inittxnmessage")
            .map(|s| s.to_string())
            .or(raw.message.clone());
        Ok((status, reason, raw.data.unwrap_or_else(|| json!({}))))
    }
}

/// Orange reports success as either `SUCCESSFUL` or the long-standing
/// `SUCCESSFULL` typo variant; both must be honored. Unknown values stay
/// non-terminal.
pub fn map_orange_payment_status(raw: &str) -> PaymentStatus {
    match raw.trim().to_uppercase().as_str() {
        "SUCCESSFUL" | "SUCCESSFULL" => PaymentStatus::Completed,
        "FAILED" | "EXPIRED" => PaymentStatus::Failed,
        "CANCELLED" | "CANCELED" => PaymentStatus::Cancelled,
        "PENDING" | "INITIATED" | "INITIALIZED" => PaymentStatus::Processing,
        _ => PaymentStatus::Processing,
    }
}

pub fn map_orange_payout_status(raw: &str) -> PayoutStatus {
    match raw.trim().to_uppercase().as_str() {
        "SUCCESSFUL" | "SUCCESSFULL" => PayoutStatus::Completed,
        "FAILED" | "EXPIRED" | "REJECTED" => PayoutStatus::Failed,
        "PENDING" | "INITIATED" | "INITIALIZED" => PayoutStatus::Processing,
        _ => PayoutStatus::Processing,
    }
}

#[async_trait]
impl PaymentProvider for OrangeProvider {
    async fn request_payment(&self, request: ChargeRequest) -> PaymentResult<ProviderReceipt> {
        validate_amount(&request.amount, "amount")?;
        let msisdn = normalize_msisdn(&request.phone_number)?;
        let token = self.access_token().await?;

        let payload = json!({
            "subscriberMsisdn": msisdn,
            "channelUserMsisdn": self.config.merchant_msisdn,
            "pin": self.config.pin,
            "amount": request.amount.to_string(),
            "orderId": request.reference,
            "description": request.description.clone().unwrap_or_else(|| "Ride booking payment".to_string()),
            "notifUrl": JsonValue::Null,
        });

        let raw: OrangeEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/omcoreapis/1.0.2/mp/pay"),
                Some(&token),
                Some(&payload),
                &[],
            )
            .await?;

        let pay_token = Self::data_field(raw.data.as_ref(), "payToken")
            .map(|s| s.to_string())
            .ok_or_else(|| PaymentError::ProviderError {
                provider: "orange".to_string(),
                message: raw
                    .message
                    .clone()
                    .unwrap_or_else(|| "missing payToken in response".to_string()),
                provider_code: None,
                retryable: false,
            })?;

        info!(pay_token = %pay_token, order_id = %request.reference, "orange payment initiated");
        Ok(ProviderReceipt {
            transaction_id: pay_token,
            message: raw.message,
            api_response: raw.data,
        })
    }

    async fn check_payment(&self, transaction_id: &str) -> PaymentResult<PaymentStatusCheck> {
        let (raw_status, reason, raw) = self.fetch_status(transaction_id).await?;
        Ok(PaymentStatusCheck {
            status: map_orange_payment_status(&raw_status),
            raw_status,
            failure_reason: reason,
            api_response: Some(raw),
        })
    }

    async fn disburse(&self, request: DisbursementRequest) -> PaymentResult<ProviderReceipt> {
        validate_amount(&request.amount, "amount")?;
        let msisdn = normalize_msisdn(&request.phone_number)?;
        let token = self.access_token().await?;

        let payload = json!({
            "subscriberMsisdn": msisdn,
            "channelUserMsisdn": self.config.merchant_msisdn,
            "pin": self.config.pin,
            "amount": request.amount.to_string(),
            "orderId": request.reference,
            "description": request.reason.clone().unwrap_or_else(|| "Driver earnings".to_string()),
        });

        let raw: OrangeEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/omcoreapis/1.0.2/cashin/pay"),
                Some(&token),
                Some(&payload),
                &[],
            )
            .await?;

        let pay_token = Self::data_field(raw.data.as_ref(), "payToken")
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(pay_token = %pay_token, order_id = %request.reference, "orange cashin initiated");
        Ok(ProviderReceipt {
            transaction_id: pay_token,
            message: raw.message,
            api_response: raw.data,
        })
    }

    async fn check_payout_status(&self, transaction_id: &str) -> PaymentResult<PayoutStatusCheck> {
        let (raw_status, reason, raw) = self.fetch_status(transaction_id).await?;
        Ok(PayoutStatusCheck {
            status: map_orange_payout_status(&raw_status),
            raw_status,
            failure_reason: reason,
            api_response: Some(raw),
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<ProviderReceipt> {
        // Orange has no dedicated reversal endpoint; refunds are cashins
        // back to the subscriber.
        self.disburse(DisbursementRequest {
            amount: request.amount,
            currency: request.currency,
            phone_number: request.phone_number,
            reference: request.reference,
            reason: Some("Booking refund".to_string()),
        })
        .await
    }

    fn name(&self) -> ProviderName {
        ProviderName::Orange
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
        let data = parsed.get("data").unwrap_or(&parsed);
        let raw_status = data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let transaction_id = data
            .get("payToken")
            .or_else(|| data.get("paytoken"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(WebhookEvent {
            provider: ProviderName::Orange,
            event_type: format!("orange.payment.{}", raw_status.to_lowercase()),
            transaction_id,
            status: if raw_status.is_empty() {
                None
            } else {
                Some(map_orange_payment_status(&raw_status))
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
    fn successfull_typo_variant_maps_to_completed() {
        assert_eq!(
            map_orange_payment_status("SUCCESSFULL"),
            PaymentStatus::Completed
        );
        assert_eq!(
            map_orange_payment_status("SUCCESSFUL"),
            PaymentStatus::Completed
        );
    }

    #[test]
    fn unknown_status_stays_non_terminal() {
        assert_eq!(
            map_orange_payment_status("WEIRD_NEW_STATE"),
            PaymentStatus::Processing
        );
        assert_eq!(map_orange_payment_status(""), PaymentStatus::Processing);
    }

    #[test]
    fn expired_sessions_fail() {
        assert_eq!(map_orange_payment_status("EXPIRED"), PaymentStatus::Failed);
        assert_eq!(map_orange_payout_status("EXPIRED"), PayoutStatus::Failed);
    }

    #[test]
    fn webhook_event_reads_nested_data_block() {
        let config = OrangeConfig {
            base_url: "https://example.test".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            merchant_msisdn: "237690000000".to_string(),
            pin: "0000".to_string(),
            webhook_secret: None,
            timeout_secs: 5,
            max_retries: 0,
        };
        let provider = OrangeProvider::new(config).expect("provider builds");

        let body = serde_json::to_vec(&json!({
            "data": {"payToken": "OM-TOKEN-42", "status": "SUCCESSFULL"}
        }))
        .expect("serializable");
        let event = provider.parse_webhook_event(&body).expect("parses");
        assert_eq!(event.status, Some(PaymentStatus::Completed));
        assert_eq!(event.transaction_id.as_deref(), Some("OM-TOKEN-42"));
    }
}
