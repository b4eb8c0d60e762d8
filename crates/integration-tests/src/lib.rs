//! End-to-end tests for the Ratna API.
//!
//! Every test drives the real axum router in-process with
//! `tower::ServiceExt::oneshot`. Storage is the in-memory store, time is a
//! [`ManualClock`], mail lands in an [`Outbox`] and the card provider is a
//! recording fake, so no database or network is needed.
//!
//! ```bash
//! cargo test -p ratna-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use chrono::{TimeZone, Utc};
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;

use ratna_api::db::{AccountStore, MemoryStore, ShippingRateStore};
use ratna_api::models::NewShippingRate;
use ratna_api::services::auth::{CredentialHasher, TokenSigner};
use ratna_api::services::email::Outbox;
use ratna_api::services::payments::{
    CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway, StripeSignatureVerifier,
};
use ratna_api::state::{AppState, AppStateBuilder};
use ratna_core::{Clock, Email, ManualClock, Price, ProductId, Role, ShippingRateId};

pub use ratna_api;
pub use ratna_core;

/// Password that satisfies the credential policy.
pub const PASSWORD: &str = "Strong1!";

const SESSION_SECRET: &str = "integration-session-secret-7f3a9c1e5b2d8f4a6c0e";
const WEBHOOK_SECRET: &str = "whsec_integration_4b8d2f6a0c3e";

/// Card provider stand-in that records every checkout request.
#[derive(Debug, Default)]
pub struct FakeGateway {
    requests: Mutex<Vec<CheckoutRequest>>,
}

impl FakeGateway {
    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        requests.push(request.clone());
        let id = format!("cs_test_{}", requests.len());
        Ok(CheckoutSession {
            url: format!("https://checkout.example/{id}"),
            id,
        })
    }
}

/// A router plus handles on everything behind it.
pub struct TestApp {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub outbox: Arc<Outbox>,
    pub gateway: Arc<FakeGateway>,
    pub verifier: Arc<StripeSignatureVerifier>,
    router: Router,
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

impl TestApp {
    /// All routes without rate limiting.
    #[must_use]
    pub fn new() -> Self {
        Self::build(|state| ratna_api::routes::routes().with_state(state))
    }

    /// The production router, rate limiter included.
    #[must_use]
    pub fn production() -> Self {
        Self::build(ratna_api::app)
    }

    fn build(router: impl FnOnce(AppState) -> Router) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
                .single()
                .expect("valid start time"),
        ));
        let outbox = Arc::new(Outbox::new());
        let gateway = Arc::new(FakeGateway::default());
        let verifier = Arc::new(StripeSignatureVerifier::new(SecretString::from(
            WEBHOOK_SECRET,
        )));
        let tokens = TokenSigner::new(&SecretString::from(SESSION_SECRET))
            .expect("session secret is a valid key");

        let state = AppStateBuilder::new(
            Arc::new(store.clone()),
            tokens,
            Url::parse("https://shop.example").expect("valid base url"),
        )
        .clock(clock.clone())
        .mailer(outbox.clone())
        .hasher(CredentialHasher::minimum_cost())
        .gateway(gateway.clone())
        .verifier(verifier.clone())
        .build();

        Self {
            router: router(state),
            store,
            clock,
            outbox,
            gateway,
            verifier,
        }
    }

    /// Send a JSON request and decode the JSON response (`Null` when empty).
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.10");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        self.dispatch(request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, token, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, token, Some(body)).await
    }

    /// Deliver a webhook body with the given `Stripe-Signature` header.
    pub async fn webhook(&self, raw_body: &[u8], signature: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        let request = builder
            .body(Body::from(raw_body.to_vec()))
            .expect("valid request");
        self.dispatch(request).await
    }

    /// A valid signature header for `raw_body` at the current time.
    #[must_use]
    pub fn sign(&self, raw_body: &[u8]) -> String {
        self.verifier.header_for(raw_body, self.clock.now())
    }

    async fn dispatch(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }

    /// The last numeric code mailed to `email`.
    #[must_use]
    pub fn code_for(&self, email: &str) -> String {
        let email = Email::parse(email).expect("valid email");
        self.outbox
            .last_code_for(&email)
            .expect("a code was mailed")
    }

    /// Register, verify the one-time code and return the session token.
    pub async fn signed_up(&self, email: &str) -> String {
        let (status, _) = self
            .post(
                "/api/auth/register",
                None,
                json!({
                    "email": email,
                    "name": "Test Customer",
                    "password": PASSWORD,
                    "confirm_password": PASSWORD,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let code = self.code_for(email);
        let (status, body) = self
            .post("/api/auth/otp/verify", None, json!({"email": email, "code": code}))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        token_of(&body)
    }

    /// Log in and return the session token.
    pub async fn login(&self, email: &str, password: &str) -> String {
        let (status, body) = self
            .post(
                "/api/auth/login",
                None,
                json!({"email": email, "password": password}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        token_of(&body)
    }

    /// A verified admin account's session token.
    pub async fn admin(&self) -> String {
        let email = "owner@ratna.example";
        self.signed_up(email).await;
        self.store
            .set_role(&Email::parse(email).expect("valid email"), Role::Admin)
            .await
            .expect("account exists");
        self.login(email, PASSWORD).await
    }

    /// An active shipping rate.
    pub async fn shipping_rate(&self, name: &str, rupees: u32) -> ShippingRateId {
        self.store
            .create_shipping_rate(
                &NewShippingRate {
                    name: name.to_owned(),
                    cost: Price::from_rupees(rupees),
                    is_active: true,
                    estimated_delivery: None,
                },
                self.clock.now(),
            )
            .await
            .expect("rate created")
            .id
    }

    /// An available catalog product.
    pub async fn product(&self, name: &str, rupees: u32) -> ProductId {
        self.store
            .insert_product(name, Price::from_rupees(rupees), true)
            .await
    }

    /// Put `quantity` of `product` in the cart.
    pub async fn add_to_cart(&self, token: &str, product: ProductId, quantity: u32) {
        let (status, body) = self
            .post(
                "/api/cart/items",
                Some(token),
                json!({"product_id": product, "quantity": quantity}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    /// Place an order from the current cart and return its JSON view.
    pub async fn place_order(&self, token: &str, rate: ShippingRateId, method: &str) -> Value {
        let (status, body) = self
            .post(
                "/api/orders",
                Some(token),
                json!({
                    "shipping_rate_id": rate,
                    "payment_method": method,
                    "shipping_address": address(),
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }
}

/// A complete delivery address.
#[must_use]
pub fn address() -> Value {
    json!({
        "full_name": "Sita Sharma",
        "street": "Durbar Marg 12",
        "city": "Kathmandu",
        "province": "Bagmati",
        "phone": "9801234567",
        "email": "sita@example.com"
    })
}

/// The `token` field of a login or verification response.
#[must_use]
pub fn token_of(body: &Value) -> String {
    body["token"]
        .as_str()
        .expect("response carries a token")
        .to_owned()
}

/// Decode a JSON money amount.
#[must_use]
pub fn price(value: &Value) -> Price {
    serde_json::from_value(value.clone()).expect("a price")
}
