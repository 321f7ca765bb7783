use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::database::booking_repository::Booking;
use crate::error::AppError;
use crate::middleware::error::{app_error_response, get_request_id_from_headers, success_response};
use crate::payments::types::ProviderName;
use crate::services::booking::{BookingError, BookingService, CreateBookingInput};
use crate::services::cancellation::CancellationOutcome;
use crate::services::payout::{PayoutDestination, PayoutService};

pub struct BookingApiState {
    pub bookings: Arc<BookingService>,
    pub payouts: Arc<PayoutService>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub ride_id: Uuid,
    pub user_id: Uuid,
    pub seats: i32,
    pub pickup_point: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub seats: i32,
    pub status: String,
    pub payment_status: String,
    pub pickup_point_name: Option<String>,
    pub pickup_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&Booking> for BookingResponse {
    fn from(booking: &Booking) -> Self {
        Self {
            id: booking.id,
            ride_id: booking.ride_id,
            seats: booking.seats,
            status: booking.status.clone(),
            payment_status: booking.payment_status.clone(),
            pickup_point_name: booking.pickup_point_name.clone(),
            pickup_time: booking.pickup_time,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancellationResponse {
    pub booking_cancelled: bool,
    pub refund_id: Option<Uuid>,
    pub refund_dispatch_failed: bool,
}

impl From<CancellationOutcome> for CancellationResponse {
    fn from(outcome: CancellationOutcome) -> Self {
        Self {
            booking_cancelled: outcome.booking_cancelled,
            refund_id: outcome.refund_id,
            refund_dispatch_failed: outcome.refund_dispatch_failed,
        }
    }
}

/// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<BookingApiState>>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<CreateBookingRequest>,
) -> impl IntoResponse {
    let request_id = get_request_id_from_headers(&headers);

    match state
        .bookings
        .create_booking(CreateBookingInput {
            ride_id: payload.ride_id,
            user_id: payload.user_id,
            seats: payload.seats,
            pickup_point: payload.pickup_point,
        })
        .await
    {
        Ok(booking) => success_response(BookingResponse::from(&booking)).into_response(),
        Err(e) => app_error_response(e, request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelBookingRequest {
    pub user_id: Uuid,
}

/// POST /api/bookings/{id}/cancel
pub async fn cancel_booking(
    State(state): State<Arc<BookingApiState>>,
    Path(booking_id): Path<Uuid>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<CancelBookingRequest>,
) -> impl IntoResponse {
    let request_id = get_request_id_from_headers(&headers);

    match state.bookings.cancel_booking(booking_id, payload.user_id).await {
        Ok(outcome) => success_response(CancellationResponse::from(outcome)).into_response(),
        Err(e) => app_error_response(e, request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct SeatChangeRequest {
    pub user_id: Uuid,
    pub seats: i32,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SeatChangeResponse {
    AmountDue { amount_due: String, currency: String },
    Refund(CancellationResponse),
}

/// POST /api/bookings/{id}/seats
///
/// Seat increases answer with the delta amount still owed; reductions on a
/// paid booking flow into the partial-refund path.
pub async fn change_seats(
    State(state): State<Arc<BookingApiState>>,
    Path(booking_id): Path<Uuid>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<SeatChangeRequest>,
) -> impl IntoResponse {
    let request_id = get_request_id_from_headers(&headers);

    match state
        .bookings
        .calculate_additional_payment_amount(booking_id, payload.seats)
        .await
    {
        Ok(amount) => success_response(SeatChangeResponse::AmountDue {
            amount_due: amount.to_string(),
            currency: "XAF".to_string(),
        })
        .into_response(),
        Err(BookingError::SeatReductionNeedsRefund) => {
            match state
                .bookings
                .reduce_seats(booking_id, payload.user_id, payload.seats)
                .await
            {
                Ok(outcome) => {
                    success_response(SeatChangeResponse::Refund(outcome.into())).into_response()
                }
                Err(e) => app_error_response(e, request_id),
            }
        }
        Err(e) => app_error_response(e, request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct CodeQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CodeResponse {
    pub code: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// GET /api/bookings/{id}/code
///
/// Lets the rider re-fetch their active verification code.
pub async fn get_verification_code(
    State(state): State<Arc<BookingApiState>>,
    Path(booking_id): Path<Uuid>,
    headers: axum::http::HeaderMap,
    axum::extract::Query(query): axum::extract::Query<CodeQuery>,
) -> impl IntoResponse {
    let request_id = get_request_id_from_headers(&headers);

    match state
        .bookings
        .get_verification_code(booking_id, query.user_id)
        .await
    {
        Ok(Some(code)) => success_response(CodeResponse {
            code: code.code,
            expires_at: code.expires_at,
        })
        .into_response(),
        Ok(None) => app_error_response(
            crate::services::booking::BookingError::BookingNotFound(booking_id),
            request_id,
        ),
        Err(e) => app_error_response(e, request_id),
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub driver_id: Uuid,
    pub code: String,
    pub payout_provider: String,
    pub payout_phone: String,
}

#[derive(Debug, Serialize)]
pub struct PayoutResponse {
    pub payout_id: Uuid,
    pub status: String,
    pub amount: String,
    pub initiated: bool,
}

/// POST /api/bookings/{id}/verify
///
/// Driver-side code verification; a valid code releases the payout.
pub async fn verify_code(
    State(state): State<Arc<BookingApiState>>,
    Path(booking_id): Path<Uuid>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<VerifyCodeRequest>,
) -> impl IntoResponse {
    let request_id = get_request_id_from_headers(&headers);

    let provider: ProviderName = match payload.payout_provider.parse() {
        Ok(p) => p,
        Err(e) => return app_error_response(AppError::from(e), request_id),
    };

    match state
        .payouts
        .verify_and_initiate_payout(
            booking_id,
            payload.driver_id,
            &payload.code,
            PayoutDestination {
                provider,
                phone_number: payload.payout_phone,
            },
        )
        .await
    {
        Ok(outcome) => success_response(PayoutResponse {
            payout_id: outcome.payout.id,
            status: outcome.payout.status.clone(),
            amount: outcome.payout.amount.to_string(),
            initiated: outcome.initiated,
        })
        .into_response(),
        Err(e) => app_error_response(e, request_id),
    }
}
