//! Unified error handling for the SafeRide backend
//!
//! Provides a single application error with proper HTTP status mapping,
//! user-facing messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::error::DatabaseError;
use crate::payments::error::PaymentError;
use crate::payments::types::PaymentStatus;
use crate::services::booking::BookingError;
use crate::services::cancellation::CancellationError;
use crate::services::payment::PaymentServiceError;
use crate::services::payout::PayoutError;

/// Stable error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "BOOKING_NOT_FOUND")]
    BookingNotFound,
    #[serde(rename = "RIDE_NOT_FOUND")]
    RideNotFound,
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "SEATS_UNAVAILABLE")]
    SeatsUnavailable,
    #[serde(rename = "ILLEGAL_STATUS_TRANSITION")]
    IllegalStatusTransition,
    #[serde(rename = "CANCELLATION_BLOCKED")]
    CancellationBlocked,
    #[serde(rename = "NOT_RIDE_DRIVER")]
    NotRideDriver,
    #[serde(rename = "INVALID_VERIFICATION_CODE")]
    InvalidVerificationCode,
    #[serde(rename = "INVALID_PICKUP_POINT")]
    InvalidPickupPoint,
    #[serde(rename = "SEAT_REDUCTION_NEEDS_REFUND")]
    SeatReductionNeedsRefund,
    #[serde(rename = "BOOKING_NOT_PAID")]
    BookingNotPaid,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    BookingNotFound { booking_id: String },
    RideNotFound { ride_id: String },
    PaymentNotFound { payment_id: String },
    SeatsUnavailable { reason: String },
    IllegalTransition { from: PaymentStatus, to: PaymentStatus },
    CancellationBlocked { reason: String },
    NotRideDriver,
    InvalidVerificationCode,
    InvalidPickupPoint { name: String },
    SeatReductionNeedsRefund,
    BookingNotPaid,
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// External service errors (mobile money providers)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    InvalidPhoneNumber { phone: String },
    MissingField { field: String },
    InvalidValue { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::BookingNotFound { .. }
                | DomainError::RideNotFound { .. }
                | DomainError::PaymentNotFound { .. } => 404,
                DomainError::SeatsUnavailable { .. } => 409,
                DomainError::IllegalTransition { .. } => 409,
                DomainError::CancellationBlocked { .. } => 409,
                DomainError::NotRideDriver => 403,
                DomainError::InvalidVerificationCode => 422,
                DomainError::InvalidPickupPoint { .. } => 422,
                DomainError::SeatReductionNeedsRefund => 422,
                DomainError::BookingNotPaid => 422,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::RateLimit { .. } => 429,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::BookingNotFound { .. } => ErrorCode::BookingNotFound,
                DomainError::RideNotFound { .. } => ErrorCode::RideNotFound,
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::SeatsUnavailable { .. } => ErrorCode::SeatsUnavailable,
                DomainError::IllegalTransition { .. } => ErrorCode::IllegalStatusTransition,
                DomainError::CancellationBlocked { .. } => ErrorCode::CancellationBlocked,
                DomainError::NotRideDriver => ErrorCode::NotRideDriver,
                DomainError::InvalidVerificationCode => ErrorCode::InvalidVerificationCode,
                DomainError::InvalidPickupPoint { .. } => ErrorCode::InvalidPickupPoint,
                DomainError::SeatReductionNeedsRefund => ErrorCode::SeatReductionNeedsRefund,
                DomainError::BookingNotPaid => ErrorCode::BookingNotPaid,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::BookingNotFound { booking_id } => {
                    format!("Booking '{}' not found", booking_id)
                }
                DomainError::RideNotFound { ride_id } => format!("Ride '{}' not found", ride_id),
                DomainError::PaymentNotFound { payment_id } => {
                    format!("Payment '{}' not found", payment_id)
                }
                DomainError::SeatsUnavailable { reason } => {
                    format!("Seats could not be reserved: {}", reason)
                }
                DomainError::IllegalTransition { from, to } => {
                    format!("Payment cannot move from '{}' to '{}'", from, to)
                }
                DomainError::CancellationBlocked { reason } => reason.clone(),
                DomainError::NotRideDriver => {
                    "Only the ride's driver can perform this action".to_string()
                }
                DomainError::InvalidVerificationCode => {
                    "The verification code is invalid or has expired".to_string()
                }
                DomainError::InvalidPickupPoint { name } => {
                    format!("Pickup point '{}' does not exist on this ride", name)
                }
                DomainError::SeatReductionNeedsRefund => {
                    "Reducing seats on a paid booking requires the refund flow".to_string()
                }
                DomainError::BookingNotPaid => {
                    "The booking has not been paid yet".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("Rate limit exceeded for {}. Please try again later", service),
                },
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidPhoneNumber { phone } => {
                    format!("Invalid phone number '{}'", phone)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidValue { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            is_retryable: err.is_retryable(),
            message: err.to_string(),
        }))
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ValidationError { message, field } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidValue {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                }))
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                service: "payment provider".to_string(),
                retry_after: retry_after_seconds,
            })),
            other => {
                let is_retryable = other.is_retryable();
                AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: "payments".to_string(),
                    message: other.to_string(),
                    is_retryable,
                }))
            }
        }
    }
}

impl From<PaymentServiceError> for AppError {
    fn from(err: PaymentServiceError) -> Self {
        match err {
            PaymentServiceError::IllegalTransition { from, to } => {
                AppError::new(AppErrorKind::Domain(DomainError::IllegalTransition {
                    from,
                    to,
                }))
            }
            PaymentServiceError::NotFound(id) => {
                AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
                    payment_id: id.to_string(),
                }))
            }
            PaymentServiceError::CorruptStatus { id, status } => {
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message: format!("payment {} has unknown status '{}'", id, status),
                    is_retryable: false,
                }))
            }
            PaymentServiceError::Validation(e) => e.into(),
            PaymentServiceError::Database(e) => e.into(),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::RideNotFound(id) => {
                AppError::new(AppErrorKind::Domain(DomainError::RideNotFound {
                    ride_id: id.to_string(),
                }))
            }
            BookingError::BookingNotFound(id) => {
                AppError::new(AppErrorKind::Domain(DomainError::BookingNotFound {
                    booking_id: id.to_string(),
                }))
            }
            BookingError::RideCancelled => {
                AppError::new(AppErrorKind::Domain(DomainError::SeatsUnavailable {
                    reason: "the ride has been cancelled".to_string(),
                }))
            }
            BookingError::SeatsUnavailable(reason) => {
                AppError::new(AppErrorKind::Domain(DomainError::SeatsUnavailable { reason }))
            }
            BookingError::InvalidPickupPoint(name) => {
                AppError::new(AppErrorKind::Domain(DomainError::InvalidPickupPoint { name }))
            }
            BookingError::InvalidSeatCount => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidValue {
                    field: "seats".to_string(),
                    reason: "seat count must be positive".to_string(),
                }))
            }
            BookingError::SeatReductionNeedsRefund => {
                AppError::new(AppErrorKind::Domain(DomainError::SeatReductionNeedsRefund))
            }
            BookingError::NotBookingOwner => {
                AppError::new(AppErrorKind::Domain(DomainError::CancellationBlocked {
                    reason: "the booking belongs to another rider".to_string(),
                }))
            }
            BookingError::AlreadyVerified => {
                AppError::new(AppErrorKind::Domain(DomainError::CancellationBlocked {
                    reason:
                        "Cancellation is no longer possible: the ride was confirmed with the driver"
                            .to_string(),
                }))
            }
            BookingError::Cancellation(e) => e.into(),
            BookingError::Database(e) => e.into(),
        }
    }
}

impl From<CancellationError> for AppError {
    fn from(err: CancellationError) -> Self {
        match err {
            CancellationError::BookingNotFound(id) => {
                AppError::new(AppErrorKind::Domain(DomainError::BookingNotFound {
                    booking_id: id.to_string(),
                }))
            }
            CancellationError::NothingToRefund => {
                AppError::new(AppErrorKind::Domain(DomainError::BookingNotPaid))
            }
            CancellationError::InvalidSeatReduction { current } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidValue {
                    field: "seats".to_string(),
                    reason: format!("new seat count must be between 1 and {}", current - 1),
                }))
            }
            CancellationError::CancelRejected(reason) => {
                AppError::new(AppErrorKind::Domain(DomainError::CancellationBlocked { reason }))
            }
            CancellationError::Provider(e) => e.into(),
            CancellationError::Database(e) => e.into(),
        }
    }
}

impl From<PayoutError> for AppError {
    fn from(err: PayoutError) -> Self {
        match err {
            PayoutError::BookingNotFound(id) => {
                AppError::new(AppErrorKind::Domain(DomainError::BookingNotFound {
                    booking_id: id.to_string(),
                }))
            }
            PayoutError::RideNotFound(id) => {
                AppError::new(AppErrorKind::Domain(DomainError::RideNotFound {
                    ride_id: id.to_string(),
                }))
            }
            PayoutError::NotRideDriver => {
                AppError::new(AppErrorKind::Domain(DomainError::NotRideDriver))
            }
            PayoutError::BookingNotPaid | PayoutError::NothingToDisburse => {
                AppError::new(AppErrorKind::Domain(DomainError::BookingNotPaid))
            }
            PayoutError::InvalidVerificationCode => {
                AppError::new(AppErrorKind::Domain(DomainError::InvalidVerificationCode))
            }
            PayoutError::Provider(e) => e.into(),
            PayoutError::Database(e) => e.into(),
        }
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_maps_to_conflict() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::IllegalTransition {
            from: PaymentStatus::Completed,
            to: PaymentStatus::Processing,
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::IllegalStatusTransition);
        assert!(error.user_message().contains("completed"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn not_found_database_error_becomes_404_domain_error() {
        let err: AppError = BookingError::BookingNotFound(uuid::Uuid::nil()).into();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.error_code(), ErrorCode::BookingNotFound);
    }

    #[test]
    fn cancellation_after_verification_is_blocked_with_clear_message() {
        let err: AppError = BookingError::AlreadyVerified.into();
        assert_eq!(err.status_code(), 409);
        assert!(err.user_message().contains("no longer possible"));
    }

    #[test]
    fn provider_errors_are_bad_gateway_and_carry_retryability() {
        let err: AppError = PaymentError::NetworkError {
            message: "timeout".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), 502);
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_errors_are_bad_request() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: "phone_number".to_string(),
        }));
        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }
}
