//! Business logic services.
//!
//! - [`auth`] - registration, login with lockout and expiry, one-time codes,
//!   password reset and change
//! - [`orders`] - order creation from the cart and the status state machine
//! - [`payments`] - payment status updates, provider webhooks, checkout sessions
//! - [`email`] - outgoing mail
//!
//! Services borrow their collaborators from [`crate::state::AppState`] for the
//! duration of a request. Notifications and audit entries are side effects:
//! failures are logged and never fail the operation that produced them.

pub mod auth;
pub mod email;
pub mod orders;
pub mod payments;

use chrono::{DateTime, Utc};

use ratna_core::AccountId;

use crate::db::{ActivityLog, NotificationSink};
use crate::models::{ActivityAction, ClientInfo, NewActivity};

/// Append a notification, logging instead of failing.
pub(crate) async fn notify<S>(store: &S, account: AccountId, message: &str, at: DateTime<Utc>)
where
    S: NotificationSink + ?Sized,
{
    if let Err(e) = store.append_notification(account, message, at).await {
        tracing::warn!(account_id = %account, error = %e, "Failed to append notification");
    }
}

/// Append an activity log entry, logging instead of failing.
pub(crate) async fn audit<S>(
    store: &S,
    account: Option<AccountId>,
    action: ActivityAction,
    detail: String,
    client: &ClientInfo,
    at: DateTime<Utc>,
) where
    S: ActivityLog + ?Sized,
{
    let entry = NewActivity {
        account_id: account,
        action,
        detail,
        origin: client.ip.clone(),
        user_agent: client.user_agent.clone(),
        created_at: at,
    };
    if let Err(e) = store.append_activity(entry).await {
        tracing::error!(action = %action, error = %e, "Failed to append activity log entry");
    }
}
