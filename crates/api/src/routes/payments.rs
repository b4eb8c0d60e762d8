//! Payment provider webhook.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};

use crate::error::Result;
use crate::services::payments::{PaymentError, WebhookOutcome};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "stripe-signature";

/// `POST /api/payments/webhook`
///
/// Reads the raw body so the signature can be checked over the exact bytes
/// the provider signed. Without a configured webhook secret every delivery
/// is rejected.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>> {
    let verifier = state.verifier().ok_or(PaymentError::Signature)?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .payments()
        .handle_provider_notification(verifier, &body, signature)
        .await?;
    Ok(Json(outcome))
}
