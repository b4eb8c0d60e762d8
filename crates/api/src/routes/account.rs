//! The logged-in customer's account.

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;

use crate::db::NotificationSink;
use crate::error::Result;
use crate::middleware::{ClientContext, RequireAccount};
use crate::models::{AccountView, Notification};
use crate::state::AppState;

const NOTIFICATION_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// `GET /api/account`
pub async fn show(
    State(state): State<AppState>,
    RequireAccount(session): RequireAccount,
) -> Result<Json<AccountView>> {
    let account = state.account_security().current_account(&session).await?;
    Ok(Json(account))
}

/// `POST /api/account/password`
pub async fn change_password(
    State(state): State<AppState>,
    RequireAccount(session): RequireAccount,
    ClientContext(client): ClientContext,
    Json(form): Json<ChangePasswordRequest>,
) -> Result<StatusCode> {
    state
        .account_security()
        .change_credential(
            session.account_id,
            &form.current_password,
            &form.new_password,
            &client,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/account/notifications`
pub async fn notifications(
    State(state): State<AppState>,
    RequireAccount(session): RequireAccount,
) -> Result<Json<Vec<Notification>>> {
    let notes = state
        .store()
        .notifications_for(session.account_id, NOTIFICATION_LIMIT)
        .await?;
    Ok(Json(notes))
}
