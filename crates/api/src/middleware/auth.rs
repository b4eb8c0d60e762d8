//! Authentication extractors.
//!
//! Handlers declare what they need in their signature:
//!
//! ```rust,ignore
//! async fn my_orders(RequireAccount(session): RequireAccount) -> ... { }
//! async fn all_orders(RequireAdmin(session): RequireAdmin) -> ... { }
//! async fn login(client: ClientContext, ...) -> ... { }
//! ```
//!
//! Sessions come from an `Authorization: Bearer <token>` header and are
//! verified against the signing key on every request. Admin access is
//! checked against the stored role, so a demotion applies before the
//! token expires.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts},
};

use ratna_core::Role;

use crate::db::AccountStore;
use crate::error::{AppError, set_sentry_user};
use crate::middleware::rate_limit::client_ip;
use crate::models::ClientInfo;
use crate::services::auth::{AuthError, Session, authorize};
use crate::state::AppState;

/// Extractor that requires a valid session.
pub struct RequireAccount(pub Session);

impl FromRequestParts<AppState> for RequireAccount {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

        let session = state
            .tokens()
            .verify(token, state.clock().now())
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected session token");
                AppError::Auth(e.into())
            })?;

        set_sentry_user(&session.account_id, Some(session.email.as_str()));
        Ok(Self(session))
    }
}

/// Extractor that requires an account whose stored role is admin.
pub struct RequireAdmin(pub Session);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let RequireAccount(mut session) = RequireAccount::from_request_parts(parts, state).await?;
        authorize(&session, Role::Admin)?;

        let account = state
            .store()
            .account_by_id(session.account_id)
            .await?
            .ok_or(AuthError::Forbidden)?;
        session.role = account.role;
        if let Err(e) = authorize(&session, Role::Admin) {
            tracing::warn!(account_id = %session.account_id, "Admin token used after demotion");
            return Err(e.into());
        }
        Ok(Self(session))
    }
}

/// Caller origin and user agent, for the activity log.
pub struct ClientContext(pub ClientInfo);

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = client_ip(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip())
            })
            .map(|ip| ip.to_string());
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.chars().take(512).collect());

        Ok(Self(ClientInfo { ip, user_agent }))
    }
}
