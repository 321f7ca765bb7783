use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::services::webhook::{WebhookProcessor, WebhookProcessorError};

pub struct CallbackState {
    pub processor: Arc<WebhookProcessor>,
}

/// POST /callbacks/{provider}
///
/// One handler per provider path segment. Provider-specific payload
/// parsing happens inside the adapter; from here on everything rides the
/// universal state machine. Processing failures still answer 200 so the
/// provider does not re-deliver forever; the event log's retry pass owns
/// them now.
pub async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Path(provider): Path<String>,
    headers: axum::http::HeaderMap,
    body: String,
) -> impl IntoResponse {
    info!(provider = %provider, "Received provider callback");

    let signature = signature_header(&provider)
        .and_then(|name| headers.get(name))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match state
        .processor
        .process_webhook(&provider, signature.as_deref(), body.as_bytes())
        .await
    {
        Ok(_) => {
            info!(provider = %provider, "Callback processed successfully");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Err(WebhookProcessorError::InvalidSignature) => {
            warn!(provider = %provider, "Invalid callback signature");
            (StatusCode::UNAUTHORIZED, "Invalid signature").into_response()
        }
        Err(WebhookProcessorError::UnknownProvider(name)) => {
            warn!(provider = %name, "Callback for unknown provider");
            (StatusCode::NOT_FOUND, "Unknown provider").into_response()
        }
        Err(WebhookProcessorError::AlreadyProcessed) => {
            info!(provider = %provider, "Callback already processed");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Err(e) => {
            error!(provider = %provider, error = %e, "Callback processing failed");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
    }
}

fn signature_header(provider: &str) -> Option<&'static str> {
    match provider {
        "mtn" => Some("x-callback-signature"),
        "orange" => Some("x-om-signature"),
        "pawapay" => Some("x-signature"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_provider_has_a_signature_header() {
        assert_eq!(signature_header("mtn"), Some("x-callback-signature"));
        assert_eq!(signature_header("orange"), Some("x-om-signature"));
        assert_eq!(signature_header("pawapay"), Some("x-signature"));
        assert_eq!(signature_header("paypal"), None);
    }
}
