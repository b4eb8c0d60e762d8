//! Per-account notifications.

use chrono::{DateTime, Utc};
use serde::Serialize;

use ratna_core::{AccountId, NotificationId};

/// A message shown in the customer's notification list.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: NotificationId,
    pub account_id: AccountId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
