use crate::database::booking_repository::Booking;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// What happened, from the recipient's point of view. The verification
/// code travels only in the passenger variant; the driver is never sent
/// the code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationType {
    PaymentReceived { verification_code: String },
    PaymentFailed { retry_url: String },
    DriverBookingPaid,
    BookingCancelled,
    RefundIssued,
    PayoutCompleted,
    PayoutFailed,
}

/// Fire-and-forget dispatch seam. Push/SMS/WhatsApp delivery is an
/// external collaborator; this service records the trigger and its
/// outcome, and its result is only ever inspected for logging.
pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        Self
    }

    pub async fn notify_passenger(
        &self,
        booking: &Booking,
        notification_type: NotificationType,
        message: &str,
    ) {
        match &notification_type {
            NotificationType::PaymentReceived { verification_code } => {
                info!(
                    booking_id = %booking.id,
                    user_id = %booking.user_id,
                    verification_code = %verification_code,
                    "NOTIFICATION passenger: payment received - {}", message
                );
            }
            NotificationType::PaymentFailed { retry_url } => {
                error!(
                    booking_id = %booking.id,
                    user_id = %booking.user_id,
                    retry_url = %retry_url,
                    "NOTIFICATION passenger: payment failed - {}", message
                );
            }
            other => {
                info!(
                    booking_id = %booking.id,
                    user_id = %booking.user_id,
                    kind = ?other,
                    "NOTIFICATION passenger - {}", message
                );
            }
        }
    }

    pub async fn notify_driver(
        &self,
        booking: &Booking,
        driver_id: uuid::Uuid,
        notification_type: NotificationType,
        message: &str,
    ) {
        // The passenger's verification code must never reach the driver
        // channel; reject the variant outright instead of filtering fields.
        if matches!(notification_type, NotificationType::PaymentReceived { .. }) {
            error!(
                booking_id = %booking.id,
                "refusing to send passenger verification payload to driver channel"
            );
            return;
        }

        match &notification_type {
            NotificationType::PayoutFailed => {
                error!(
                    booking_id = %booking.id,
                    driver_id = %driver_id,
                    "NOTIFICATION driver - {}", message
                );
            }
            other => {
                info!(
                    booking_id = %booking.id,
                    driver_id = %driver_id,
                    kind = ?other,
                    "NOTIFICATION driver - {}", message
                );
            }
        }
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}
