//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                          - Liveness
//! GET  /health/ready                    - Readiness (storage ping)
//!
//! # Auth (rate limited)
//! POST /api/auth/register               - Register, sends a one-time code
//! POST /api/auth/otp/verify             - Verify the one-time code, returns a token
//! POST /api/auth/otp/resend             - Issue a fresh one-time code
//! POST /api/auth/login                  - Log in
//! POST /api/auth/password/forgot        - Send a reset code
//! POST /api/auth/password/reset         - Reset the password with the code
//!
//! # Account (requires auth)
//! GET  /api/account                     - Current account
//! POST /api/account/password            - Change password
//! GET  /api/account/notifications       - Notifications
//!
//! # Cart and checkout (requires auth)
//! GET    /api/cart                      - Cart lines
//! POST   /api/cart/items                - Add or update a line
//! DELETE /api/cart/items/{product_id}   - Remove a line
//! GET    /api/shipping-rates            - Active shipping rates (public)
//! POST   /api/orders                    - Place an order from the cart
//! GET    /api/orders                    - Own orders
//! GET    /api/orders/{number}           - Order detail
//! POST   /api/orders/{number}/cancel    - Cancel own order
//! POST   /api/orders/{number}/checkout  - Start a card payment
//!
//! # Payment provider
//! POST /api/payments/webhook            - Signed provider notification
//!
//! # Admin (requires admin role)
//! GET  /api/admin/orders                - Orders, filterable by status
//! PUT  /api/admin/orders/{number}/status
//! PUT  /api/admin/orders/{number}/payment
//! GET  /api/admin/activity              - Security activity log
//! POST /api/admin/shipping-rates
//! PUT  /api/admin/shipping-rates/{id}
//! ```

pub mod account;
pub mod admin;
pub mod auth;
pub mod cart;
pub mod health;
pub mod orders;
pub mod payments;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::middleware::{api_rate_limiter, auth_rate_limiter};
use crate::state::AppState;

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(auth::register))
        .route("/otp/verify", post(auth::verify_otp))
        .route("/otp/resend", post(auth::resend_otp))
        .route("/login", post(auth::login))
        .route("/password/forgot", post(auth::forgot_password))
        .route("/password/reset", post(auth::reset_password))
}

/// Create the account routes router.
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(account::show))
        .route("/password", post(account::change_password))
        .route("/notifications", get(account::notifications))
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/items", post(cart::set_line))
        .route("/items/{product_id}", delete(cart::remove_line))
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(orders::index).post(orders::create))
        .route("/{number}", get(orders::show))
        .route("/{number}/cancel", post(orders::cancel))
        .route("/{number}/checkout", post(orders::checkout))
}

/// Create the admin routes router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(admin::orders))
        .route("/orders/{number}/status", put(admin::set_order_status))
        .route("/orders/{number}/payment", put(admin::set_payment_status))
        .route("/activity", get(admin::activity))
        .route("/shipping-rates", post(admin::create_shipping_rate))
        .route("/shipping-rates/{id}", put(admin::update_shipping_rate))
}

fn assemble(auth: Router<AppState>) -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/api/auth", auth)
        .nest("/api/account", account_routes())
        .nest("/api/cart", cart_routes())
        .route("/api/shipping-rates", get(cart::shipping_rates))
        .nest("/api/orders", order_routes())
        .route("/api/payments/webhook", post(payments::webhook))
        .nest("/api/admin", admin_routes())
}

/// All routes, without rate limiting.
pub fn routes() -> Router<AppState> {
    assemble(auth_routes())
}

/// All routes behind the per-IP API limiter, with the stricter auth limiter
/// on the auth endpoints.
pub fn rate_limited_routes() -> Router<AppState> {
    assemble(auth_routes().layer(auth_rate_limiter())).layer(api_rate_limiter())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use secrecy::SecretString;
    use tower::ServiceExt;
    use url::Url;

    use super::*;
    use crate::db::MemoryStore;
    use crate::services::auth::TokenSigner;
    use crate::state::AppStateBuilder;

    fn router() -> Router {
        let secret = SecretString::from("route-test-secret-0123456789abcdef");
        let tokens = TokenSigner::new(&secret).unwrap();
        let state = AppStateBuilder::new(
            Arc::new(MemoryStore::new()),
            tokens,
            Url::parse("https://shop.example").unwrap(),
        )
        .build();
        routes().with_state(state)
    }

    async fn status_of(request: Request<Body>) -> StatusCode {
        router().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let request = Request::get("/health").body(Body::empty()).unwrap();
        assert_eq!(status_of(request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_routes_need_a_bearer_token() {
        for uri in ["/api/account", "/api/cart", "/api/orders", "/api/admin/orders"] {
            let request = Request::get(uri).body(Body::empty()).unwrap();
            assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_webhook_rejected_without_configured_secret() {
        let request = Request::post("/api/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .header("stripe-signature", "t=1,v1=00")
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_shipping_rates_are_public() {
        let request = Request::get("/api/shipping-rates").body(Body::empty()).unwrap();
        assert_eq!(status_of(request).await, StatusCode::OK);
    }
}
