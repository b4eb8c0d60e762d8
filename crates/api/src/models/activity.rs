//! Security activity log entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use ratna_core::{AccountId, ActivityId};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    Registered,
    EmailVerified,
    LoginSucceeded,
    LoginFailed,
    LoginBlocked,
    AccountLocked,
    PasswordExpired,
    PasswordResetRequested,
    PasswordReset,
    PasswordChanged,
}

impl ActivityAction {
    const ALL: [Self; 10] = [
        Self::Registered,
        Self::EmailVerified,
        Self::LoginSucceeded,
        Self::LoginFailed,
        Self::LoginBlocked,
        Self::AccountLocked,
        Self::PasswordExpired,
        Self::PasswordResetRequested,
        Self::PasswordReset,
        Self::PasswordChanged,
    ];

    /// Stored/wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::EmailVerified => "EMAIL_VERIFIED",
            Self::LoginSucceeded => "LOGIN_SUCCEEDED",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::LoginBlocked => "LOGIN_BLOCKED",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::PasswordExpired => "PASSWORD_EXPIRED",
            Self::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            Self::PasswordReset => "PASSWORD_RESET",
            Self::PasswordChanged => "PASSWORD_CHANGED",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("unknown activity action: {s}"))
    }
}

/// Who made a request, as far as the network can tell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Originating IP address.
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// An entry to append.
#[derive(Debug, Clone)]
pub struct NewActivity {
    /// `None` when the identity did not resolve to an account.
    pub account_id: Option<AccountId>,
    pub action: ActivityAction,
    pub detail: String,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A stored entry.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub id: ActivityId,
    pub account_id: Option<AccountId>,
    pub action: ActivityAction,
    pub detail: String,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_round_trip() {
        for action in ActivityAction::ALL {
            assert_eq!(action.as_str().parse::<ActivityAction>().unwrap(), action);
        }
        assert!("SOMETHING_ELSE".parse::<ActivityAction>().is_err());
    }
}
