//! Registration, verification, login and password reset.

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use tracing::instrument;

use crate::error::Result;
use crate::middleware::ClientContext;
use crate::services::auth::{LoginOutcome, PendingVerification, Registration, ResetRequested};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

/// `POST /api/auth/register`
#[instrument(skip(state, client, form), fields(email = %form.email))]
pub async fn register(
    State(state): State<AppState>,
    ClientContext(client): ClientContext,
    Json(form): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<PendingVerification>)> {
    let pending = state
        .account_security()
        .register(
            Registration {
                email: form.email,
                name: form.name,
                phone: form.phone,
                password: form.password,
                confirm_password: form.confirm_password,
            },
            &client,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(pending)))
}

/// `POST /api/auth/otp/verify`
#[instrument(skip(state, client, form), fields(email = %form.email))]
pub async fn verify_otp(
    State(state): State<AppState>,
    ClientContext(client): ClientContext,
    Json(form): Json<VerifyRequest>,
) -> Result<Json<LoginOutcome>> {
    let outcome = state
        .account_security()
        .verify_one_time_code(&form.email, &form.code, &client)
        .await?;
    Ok(Json(outcome))
}

/// `POST /api/auth/otp/resend`
#[instrument(skip(state, form), fields(email = %form.email))]
pub async fn resend_otp(
    State(state): State<AppState>,
    Json(form): Json<EmailRequest>,
) -> Result<Json<PendingVerification>> {
    let pending = state
        .account_security()
        .resend_one_time_code(&form.email)
        .await?;
    Ok(Json(pending))
}

/// `POST /api/auth/login`
#[instrument(skip(state, client, form), fields(email = %form.email))]
pub async fn login(
    State(state): State<AppState>,
    ClientContext(client): ClientContext,
    Json(form): Json<LoginRequest>,
) -> Result<Json<LoginOutcome>> {
    let outcome = state
        .account_security()
        .authenticate(&form.email, &form.password, &client)
        .await?;
    Ok(Json(outcome))
}

/// `POST /api/auth/password/forgot`
#[instrument(skip(state, client, form), fields(email = %form.email))]
pub async fn forgot_password(
    State(state): State<AppState>,
    ClientContext(client): ClientContext,
    Json(form): Json<EmailRequest>,
) -> Result<(StatusCode, Json<ResetRequested>)> {
    let requested = state
        .account_security()
        .request_reset(&form.email, &client)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(requested)))
}

/// `POST /api/auth/password/reset`
#[instrument(skip(state, client, form), fields(email = %form.email))]
pub async fn reset_password(
    State(state): State<AppState>,
    ClientContext(client): ClientContext,
    Json(form): Json<ResetRequest>,
) -> Result<StatusCode> {
    state
        .account_security()
        .confirm_reset(&form.email, &form.code, &form.new_password, &client)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
