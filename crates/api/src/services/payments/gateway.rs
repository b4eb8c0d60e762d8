//! Hosted checkout sessions with the card provider.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use ratna_core::{Email, OrderId, OrderNumber, Price};

/// Errors from the payment provider's API.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Could not reach the provider.
    #[error("request failed: {0}")]
    Request(String),

    /// The provider refused the request.
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The provider's reply did not parse.
    #[error("unexpected response: {0}")]
    Response(String),

    /// The amount does not fit the provider's minor units.
    #[error("amount out of range: {0}")]
    InvalidAmount(Price),
}

/// Everything the provider needs to open a checkout page.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub amount: Price,
    pub customer_email: Email,
    pub success_url: String,
    pub cancel_url: String,
}

/// An opened checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Where to send the customer.
    pub url: String,
}

/// Opens hosted checkout sessions.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError>;
}

/// Stripe Checkout over its form-encoded REST API.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: SecretString,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .field("secret_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl StripeGateway {
    #[must_use]
    pub fn new(api_base: impl Into<String>, secret_key: SecretString) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            secret_key,
        }
    }
}

/// Rupees to paisa.
fn minor_units(amount: Price) -> Result<i64, GatewayError> {
    (amount.amount() * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or(GatewayError::InvalidAmount(amount))
}

fn session_form(request: &CheckoutRequest) -> Result<Vec<(&'static str, String)>, GatewayError> {
    let order_id = request.order_id.to_string();
    let order_number = request.order_number.to_string();
    Ok(vec![
        ("mode", "payment".to_owned()),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
        ("customer_email", request.customer_email.to_string()),
        ("client_reference_id", order_number.clone()),
        ("line_items[0][quantity]", "1".to_owned()),
        ("line_items[0][price_data][currency]", "npr".to_owned()),
        (
            "line_items[0][price_data][unit_amount]",
            minor_units(request.amount)?.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]",
            format!("Ratna order {order_number}"),
        ),
        ("metadata[order_id]", order_id.clone()),
        ("metadata[order_number]", order_number.clone()),
        ("payment_intent_data[metadata][order_id]", order_id),
        ("payment_intent_data[metadata][order_number]", order_number),
    ])
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let form = session_form(request)?;

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map_or_else(|_| "unknown error".to_owned(), |body| body.error.message);
            tracing::error!(status = status.as_u16(), message = %message, "Checkout session rejected");
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let session: CheckoutSession = response
            .json()
            .await
            .map_err(|e| GatewayError::Response(e.to_string()))?;
        tracing::info!(session_id = %session.id, "Checkout session created");
        Ok(session)
    }
}
