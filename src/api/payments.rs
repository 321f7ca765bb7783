use axum::{extract::State, response::IntoResponse, Json};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::database::payment_repository::NewPayment;
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::middleware::error::{app_error_response, get_request_id_from_headers, success_response};
use crate::payments::factory::ProviderRegistry;
use crate::payments::types::{ChargeRequest, PaymentStatus, ProviderName};
use crate::services::orchestrator::PaymentOrchestrator;
use crate::services::payment::PaymentService;

pub struct PaymentApiState {
    pub payments: Arc<PaymentService>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub registry: Arc<ProviderRegistry>,
    pub default_currency: String,
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub booking_id: Uuid,
    pub amount: String,
    pub currency: Option<String>,
    pub provider: String,
    pub phone_number: String,
    pub idempotency_key: String,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub status: String,
    pub transaction_id: Option<String>,
}

/// POST /api/payments/initiate
///
/// Creates (or, on an idempotent replay, fetches) the payment record and
/// asks the provider to collect from the rider's wallet. The resulting
/// `processing` transition goes through the orchestrator like every other
/// status change.
pub async fn initiate_payment(
    State(state): State<Arc<PaymentApiState>>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<InitiatePaymentRequest>,
) -> impl IntoResponse {
    let request_id = get_request_id_from_headers(&headers);

    let provider: ProviderName = match payload.provider.parse() {
        Ok(p) => p,
        Err(e) => return app_error_response(AppError::from(e), request_id),
    };
    let amount = match BigDecimal::from_str(payload.amount.trim()) {
        Ok(v) => v,
        Err(_) => {
            return app_error_response(
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
                    amount: payload.amount,
                    reason: "not a decimal number".to_string(),
                })),
                request_id,
            )
        }
    };
    let currency = payload
        .currency
        .unwrap_or_else(|| state.default_currency.clone());

    let payment = match state
        .payments
        .create_payment(NewPayment {
            booking_id: payload.booking_id,
            amount: amount.clone(),
            currency: currency.clone(),
            provider: provider.clone(),
            phone_number: payload.phone_number.clone(),
            idempotency_key: payload.idempotency_key,
        })
        .await
    {
        Ok(p) => p,
        Err(e) => return app_error_response(e, request_id),
    };

    // Idempotent replay: the payment is already on its way through the
    // provider; hand back the existing record without charging again.
    if payment.status() != Some(PaymentStatus::Pending) || payment.transaction_id.is_some() {
        return success_response(InitiatePaymentResponse {
            payment_id: payment.id,
            status: payment.status.clone(),
            transaction_id: payment.transaction_id.clone(),
        })
        .into_response();
    }

    let adapter = match state.registry.require(&provider) {
        Ok(a) => a,
        Err(e) => return app_error_response(AppError::from(e), request_id),
    };

    let receipt = match adapter
        .request_payment(ChargeRequest {
            amount,
            currency,
            phone_number: payment.phone_number.clone(),
            reference: payment.id.to_string(),
            description: Some("SafeRide booking payment".to_string()),
        })
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => {
            // The provider never accepted the charge: record the failure
            // through the one orchestration path, then surface the error.
            let metadata = json!({"initiation_error": e.to_string()});
            if let Err(orch_err) = state
                .orchestrator
                .handle_payment_status_change(&payment, PaymentStatus::Failed, metadata)
                .await
            {
                warn!(payment_id = %payment.id, error = %orch_err, "failed to record initiation failure");
            }
            return app_error_response(AppError::from(e), request_id);
        }
    };

    let payment = match state
        .payments
        .set_transaction_id(payment.id, &receipt.transaction_id)
        .await
    {
        Ok(p) => p,
        Err(e) => return app_error_response(e, request_id),
    };

    let metadata = json!({
        "provider_message": receipt.message,
        "initiated_at": chrono::Utc::now().to_rfc3339(),
    });
    if let Err(e) = state
        .orchestrator
        .handle_payment_status_change(&payment, PaymentStatus::Processing, metadata)
        .await
    {
        return app_error_response(e_to_app(e), request_id);
    }

    success_response(InitiatePaymentResponse {
        payment_id: payment.id,
        status: PaymentStatus::Processing.as_str().to_string(),
        transaction_id: Some(receipt.transaction_id),
    })
    .into_response()
}

#[derive(Debug, Serialize)]
pub struct PaymentDetailsResponse {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub amount: String,
    pub currency: String,
    pub provider: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub payment_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// GET /api/payments/{id}
pub async fn get_payment(
    State(state): State<Arc<PaymentApiState>>,
    axum::extract::Path(payment_id): axum::extract::Path<Uuid>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    let request_id = get_request_id_from_headers(&headers);

    match state.payments.get_payment(payment_id).await {
        Ok(Some(payment)) => success_response(PaymentDetailsResponse {
            payment_id: payment.id,
            booking_id: payment.booking_id,
            amount: payment.amount.to_string(),
            currency: payment.currency.clone(),
            provider: payment.provider.clone(),
            status: payment.status.clone(),
            transaction_id: payment.transaction_id.clone(),
            payment_time: payment.payment_time,
        })
        .into_response(),
        Ok(None) => app_error_response(
            AppError::new(AppErrorKind::Domain(
                crate::error::DomainError::PaymentNotFound {
                    payment_id: payment_id.to_string(),
                },
            )),
            request_id,
        ),
        Err(e) => app_error_response(e, request_id),
    }
}

/// GET /api/bookings/{id}/payments
pub async fn list_booking_payments(
    State(state): State<Arc<PaymentApiState>>,
    axum::extract::Path(booking_id): axum::extract::Path<Uuid>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    let request_id = get_request_id_from_headers(&headers);

    match state.payments.list_by_booking(booking_id).await {
        Ok(payments) => {
            let items: Vec<PaymentDetailsResponse> = payments
                .iter()
                .map(|payment| PaymentDetailsResponse {
                    payment_id: payment.id,
                    booking_id: payment.booking_id,
                    amount: payment.amount.to_string(),
                    currency: payment.currency.clone(),
                    provider: payment.provider.clone(),
                    status: payment.status.clone(),
                    transaction_id: payment.transaction_id.clone(),
                    payment_time: payment.payment_time,
                })
                .collect();
            success_response(items).into_response()
        }
        Err(e) => app_error_response(e, request_id),
    }
}

fn e_to_app(err: crate::services::orchestrator::OrchestrationError) -> AppError {
    use crate::services::orchestrator::OrchestrationError;
    match err {
        OrchestrationError::Payment(e) => e.into(),
        OrchestrationError::Database(e) => e.into(),
    }
}
