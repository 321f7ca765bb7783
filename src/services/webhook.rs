use crate::database::payout_repository::PayoutRepository;
use crate::database::refund_repository::RefundRepository;
use crate::database::webhook_repository::WebhookRepository;
use crate::payments::factory::ProviderRegistry;
use crate::payments::types::{PaymentStatus, PayoutStatusCheck, ProviderName, WebhookEvent};
use crate::services::cancellation::CancellationService;
use crate::services::orchestrator::PaymentOrchestrator;
use crate::services::payment::PaymentService;
use crate::services::payout::PayoutService;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Already processed")]
    AlreadyProcessed,
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Processing error: {0}")]
    ProcessingError(String),
}

/// Webhook ingestion seam: provider-specific parsing ends here, and the
/// universal state machine begins. Payment callbacks re-enter the
/// orchestrator; payout and refund callbacks reuse the same finalizers the
/// reconciliation sweeps call.
pub struct WebhookProcessor {
    webhook_repo: Arc<WebhookRepository>,
    registry: Arc<ProviderRegistry>,
    orchestrator: Arc<PaymentOrchestrator>,
    payments: Arc<PaymentService>,
    payouts: Arc<PayoutRepository>,
    payout_service: Arc<PayoutService>,
    refunds: Arc<RefundRepository>,
    cancellation: Arc<CancellationService>,
    max_retries: i32,
}

impl WebhookProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        webhook_repo: Arc<WebhookRepository>,
        registry: Arc<ProviderRegistry>,
        orchestrator: Arc<PaymentOrchestrator>,
        payments: Arc<PaymentService>,
        payouts: Arc<PayoutRepository>,
        payout_service: Arc<PayoutService>,
        refunds: Arc<RefundRepository>,
        cancellation: Arc<CancellationService>,
        max_retries: i32,
    ) -> Self {
        Self {
            webhook_repo,
            registry,
            orchestrator,
            payments,
            payouts,
            payout_service,
            refunds,
            cancellation,
            max_retries,
        }
    }

    pub async fn process_webhook(
        &self,
        provider_name: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), WebhookProcessorError> {
        let provider = ProviderName::from_str(provider_name)
            .map_err(|_| WebhookProcessorError::UnknownProvider(provider_name.to_string()))?;
        let adapter = self
            .registry
            .get(&provider)
            .ok_or_else(|| WebhookProcessorError::UnknownProvider(provider_name.to_string()))?;

        let verification = adapter
            .verify_webhook(body, signature.unwrap_or_default())
            .map_err(|e| WebhookProcessorError::ProcessingError(e.to_string()))?;
        if !verification.valid {
            error!(provider = %provider_name, "Invalid webhook signature");
            return Err(WebhookProcessorError::InvalidSignature);
        }

        let event = adapter
            .parse_webhook_event(body)
            .map_err(|e| WebhookProcessorError::ProcessingError(e.to_string()))?;

        let event_id = extract_event_id(&event);
        let record = self
            .webhook_repo
            .log_event(
                &event_id,
                provider_name,
                &event.event_type,
                event.payload.clone(),
                signature,
            )
            .await
            .map_err(|e| WebhookProcessorError::DatabaseError(e.to_string()))?;

        if record.status == "completed" {
            info!(event_id = %event_id, "Webhook already processed");
            return Err(WebhookProcessorError::AlreadyProcessed);
        }

        match self.process_event(&event).await {
            Ok(_) => {
                self.webhook_repo
                    .mark_processed(record.id)
                    .await
                    .map_err(|e| WebhookProcessorError::DatabaseError(e.to_string()))?;
                info!(event_id = %event_id, "Webhook processed successfully");
                Ok(())
            }
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "Webhook processing failed");
                self.webhook_repo
                    .record_failure(record.id, &e.to_string())
                    .await
                    .map_err(|e| WebhookProcessorError::DatabaseError(e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Route one parsed event to the record it references. The transaction
    /// reference decides whether this is a payment, payout, or refund
    /// callback; providers do not share id namespaces.
    async fn process_event(&self, event: &WebhookEvent) -> Result<(), WebhookProcessorError> {
        let tx_ref = event.transaction_id.as_deref().ok_or_else(|| {
            WebhookProcessorError::ProcessingError("Missing transaction reference".to_string())
        })?;
        let proposed_status = event.status.ok_or_else(|| {
            WebhookProcessorError::ProcessingError("Missing status in webhook payload".to_string())
        })?;

        if let Some(payment) = self
            .payments
            .get_by_transaction_id(tx_ref)
            .await
            .map_err(|e| WebhookProcessorError::DatabaseError(e.to_string()))?
        {
            info!(tx_ref = %tx_ref, status = %proposed_status, "Processing payment webhook");
            let metadata = json!({
                "webhook_event": event.event_type,
                "webhook_received_at": event.received_at,
            });
            match self
                .orchestrator
                .handle_payment_status_change(&payment, proposed_status, metadata)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    return Err(WebhookProcessorError::ProcessingError(e.to_string()));
                }
            }
        }

        if let Some(payout) = self
            .payouts
            .find_by_transaction_id(tx_ref)
            .await
            .map_err(|e| WebhookProcessorError::DatabaseError(e.to_string()))?
        {
            info!(tx_ref = %tx_ref, "Processing payout webhook");
            let check = payout_check_from_event(event, proposed_status);
            self.payout_service
                .finalize_from_check(&payout, &check)
                .await
                .map_err(|e| WebhookProcessorError::ProcessingError(e.to_string()))?;
            return Ok(());
        }

        if let Some(refund) = self
            .refunds
            .find_by_transaction_id(tx_ref)
            .await
            .map_err(|e| WebhookProcessorError::DatabaseError(e.to_string()))?
        {
            info!(tx_ref = %tx_ref, "Processing refund webhook");
            let status = refund_status_from_payment(proposed_status);
            self.cancellation
                .finalize_refund(&refund, status, None)
                .await
                .map_err(|e| WebhookProcessorError::ProcessingError(e.to_string()))?;
            return Ok(());
        }

        warn!(tx_ref = %tx_ref, event_type = %event.event_type, "Webhook references no known record");
        Ok(())
    }

    /// Bounded re-processing of failed webhook events; runs inside the
    /// payment reconciliation cycle.
    pub async fn retry_pending(&self) -> Result<usize, WebhookProcessorError> {
        let pending = self
            .webhook_repo
            .get_pending_events(self.max_retries, 50)
            .await
            .map_err(|e| WebhookProcessorError::DatabaseError(e.to_string()))?;

        let mut processed = 0;
        for record in pending {
            let provider = match ProviderName::from_str(&record.provider) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let adapter = match self.registry.get(&provider) {
                Some(a) => a,
                None => continue,
            };

            let body = serde_json::to_vec(&record.payload).unwrap_or_default();
            let event = match adapter.parse_webhook_event(&body) {
                Ok(e) => e,
                Err(_) => continue,
            };

            match self.process_event(&event).await {
                Ok(_) => {
                    if let Err(e) = self.webhook_repo.mark_processed(record.id).await {
                        warn!(event_id = %record.event_id, error = %e, "failed to mark webhook processed");
                    }
                    processed += 1;
                }
                Err(e) => {
                    if let Err(db_err) = self
                        .webhook_repo
                        .record_failure(record.id, &e.to_string())
                        .await
                    {
                        warn!(event_id = %record.event_id, error = %db_err, "failed to record webhook failure");
                    }
                }
            }
        }

        Ok(processed)
    }
}

/// Stable dedup key for a delivery: transaction reference + event type
/// when present, otherwise a random id (unmatchable payloads are logged
/// but never deduped against each other).
fn extract_event_id(event: &WebhookEvent) -> String {
    match event.transaction_id.as_deref() {
        Some(tx_ref) => format!("{}:{}:{}", event.provider, event.event_type, tx_ref),
        None => format!("{}:{}", event.provider, Uuid::new_v4()),
    }
}

fn payout_check_from_event(event: &WebhookEvent, status: PaymentStatus) -> PayoutStatusCheck {
    PayoutStatusCheck {
        status: match status {
            PaymentStatus::Completed => crate::payments::types::PayoutStatus::Completed,
            PaymentStatus::Failed | PaymentStatus::Cancelled => {
                crate::payments::types::PayoutStatus::Failed
            }
            _ => crate::payments::types::PayoutStatus::Processing,
        },
        raw_status: event.event_type.clone(),
        failure_reason: event
            .payload
            .get("failureReason")
            .and_then(|v| v.get("failureMessage"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        api_response: Some(event.payload.clone()),
    }
}

fn refund_status_from_payment(status: PaymentStatus) -> crate::payments::types::RefundStatus {
    use crate::payments::types::RefundStatus;
    match status {
        PaymentStatus::Completed => RefundStatus::Completed,
        PaymentStatus::Failed | PaymentStatus::Cancelled => RefundStatus::Failed,
        _ => RefundStatus::Processing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(tx: Option<&str>, event_type: &str) -> WebhookEvent {
        WebhookEvent {
            provider: ProviderName::Mtn,
            event_type: event_type.to_string(),
            transaction_id: tx.map(|s| s.to_string()),
            status: Some(PaymentStatus::Completed),
            payload: json!({}),
            received_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn event_id_is_stable_for_redeliveries() {
        let a = extract_event_id(&event(Some("tx-1"), "mtn.requesttopay.successful"));
        let b = extract_event_id(&event(Some("tx-1"), "mtn.requesttopay.successful"));
        assert_eq!(a, b);
    }

    #[test]
    fn event_id_differs_per_event_type() {
        let ok = extract_event_id(&event(Some("tx-1"), "mtn.requesttopay.successful"));
        let failed = extract_event_id(&event(Some("tx-1"), "mtn.requesttopay.failed"));
        assert_ne!(ok, failed);
    }

    #[test]
    fn refund_status_mapping_keeps_non_terminal_states() {
        use crate::payments::types::RefundStatus;
        assert_eq!(
            refund_status_from_payment(PaymentStatus::Processing),
            RefundStatus::Processing
        );
        assert_eq!(
            refund_status_from_payment(PaymentStatus::Completed),
            RefundStatus::Completed
        );
    }
}
