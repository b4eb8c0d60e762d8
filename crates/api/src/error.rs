//! Unified error handling with Sentry integration.
//!
//! Every handler returns `Result<T, AppError>`. Errors become a JSON body
//! `{"error": "..."}` with a status code chosen per variant. Server-side
//! failures are captured to Sentry and their details are never sent to the
//! client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::auth::AuthError;
use crate::services::orders::OrderError;
use crate::services::payments::PaymentError;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// Missing or invalid bearer token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

const INTERNAL: &str = "Internal server error";

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Database(err) => repository_status(err),
            Self::Auth(err) => auth_status(err),
            Self::Order(err) => order_status(err),
            Self::Payment(err) => payment_status(err),
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// What the client sees.
    fn public_message(&self) -> String {
        match self {
            Self::Database(RepositoryError::NotFound) => "Not found".to_string(),
            Self::Database(RepositoryError::Conflict(msg)) => msg.clone(),
            Self::Database(_) => INTERNAL.to_string(),
            Self::Auth(AuthError::Repository(_) | AuthError::PasswordHash) => INTERNAL.to_string(),
            Self::Auth(AuthError::InvalidEmail(_)) => "Invalid email address".to_string(),
            Self::Auth(AuthError::Token(_)) => "Invalid or expired session".to_string(),
            Self::Auth(err) => err.to_string(),
            Self::Order(OrderError::Repository(_) | OrderError::Numbering(_)) => {
                INTERNAL.to_string()
            }
            Self::Order(err) => err.to_string(),
            Self::Payment(PaymentError::Repository(_)) => INTERNAL.to_string(),
            Self::Payment(PaymentError::Gateway(_)) => "Payment provider error".to_string(),
            Self::Payment(err) => err.to_string(),
            Self::Unauthorized(msg) | Self::BadRequest(msg) => msg.clone(),
        }
    }
}

const fn repository_status(err: &RepositoryError) -> StatusCode {
    match err {
        RepositoryError::NotFound => StatusCode::NOT_FOUND,
        RepositoryError::Conflict(_) => StatusCode::CONFLICT,
        RepositoryError::Database(_) | RepositoryError::DataCorruption(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

const fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidEmail(_)
        | AuthError::Validation(_)
        | AuthError::InvalidCode
        | AuthError::Policy(_)
        | AuthError::Reuse => StatusCode::BAD_REQUEST,
        AuthError::AlreadyRegistered => StatusCode::CONFLICT,
        AuthError::InvalidCredentials
        | AuthError::Locked { .. }
        | AuthError::CredentialExpired
        | AuthError::Token(_) => StatusCode::UNAUTHORIZED,
        AuthError::NotVerified | AuthError::Forbidden => StatusCode::FORBIDDEN,
        AuthError::NotFound => StatusCode::NOT_FOUND,
        AuthError::Repository(inner) => repository_status(inner),
        AuthError::PasswordHash => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

const fn order_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::EmptyCart | OrderError::InvalidShipping | OrderError::Validation(_) => {
            StatusCode::BAD_REQUEST
        }
        OrderError::Conflict(_) | OrderError::State { .. } => StatusCode::CONFLICT,
        OrderError::NotFound => StatusCode::NOT_FOUND,
        OrderError::Forbidden => StatusCode::FORBIDDEN,
        OrderError::Repository(inner) => repository_status(inner),
        OrderError::Numbering(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

const fn payment_status(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::NotFound => StatusCode::NOT_FOUND,
        PaymentError::NotPayable(_) => StatusCode::CONFLICT,
        PaymentError::Signature | PaymentError::Malformed(_) => StatusCode::BAD_REQUEST,
        PaymentError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        PaymentError::Gateway(_) => StatusCode::BAD_GATEWAY,
        PaymentError::Repository(inner) => repository_status(inner),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = Json(serde_json::json!({ "error": self.public_message() }));
        (status, body).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context for the current request.
///
/// Call this after a session token is verified to associate errors with
/// accounts.
pub fn set_sentry_user(account_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(account_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Add a breadcrumb for customer actions.
///
/// ```rust,ignore
/// add_breadcrumb("order", "Order placed", Some(&[("order_number", "RTN-MB3K9Z1Q-0042")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use ratna_core::OrderStatus;

    use super::*;

    fn status_of(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_auth_failures_share_unauthorized() {
        assert_eq!(status_of(AuthError::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(AuthError::Locked { until: Utc::now() }),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_of(AuthError::CredentialExpired), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(AuthError::NotVerified), StatusCode::FORBIDDEN);
        assert_eq!(status_of(AuthError::AlreadyRegistered), StatusCode::CONFLICT);
        assert_eq!(status_of(AuthError::Reuse), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_order_and_payment_statuses() {
        assert_eq!(status_of(OrderError::EmptyCart), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(OrderError::State {
                from: OrderStatus::Shipped,
                to: OrderStatus::Cancelled
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(PaymentError::Signature), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(PaymentError::Gateway(
                crate::services::payments::GatewayError::Request("down".to_owned())
            )),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = AppError::Database(RepositoryError::DataCorruption("bad row 7".to_owned()));
        assert_eq!(err.public_message(), INTERNAL);
        let err = AppError::Auth(AuthError::Repository(RepositoryError::DataCorruption(
            "x".to_owned(),
        )));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), INTERNAL);
    }
}
