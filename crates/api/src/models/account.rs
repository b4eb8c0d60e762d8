//! Account domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use ratna_core::{AccountId, Email, Role};

/// A one-time numeric code together with its expiry.
///
/// Used both for the registration OTP and the password-reset code.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCode {
    /// The digits sent to the customer.
    pub code: String,
    /// Last instant at which the code is accepted.
    pub expires_at: DateTime<Utc>,
}

impl IssuedCode {
    /// Whether `candidate` matches and the code has not expired at `now`.
    #[must_use]
    pub fn accepts(&self, candidate: &str, now: DateTime<Utc>) -> bool {
        now <= self.expires_at && self.code == candidate.trim()
    }
}

impl std::fmt::Debug for IssuedCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCode")
            .field("code", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A registered identity with its authentication state.
#[derive(Clone)]
pub struct Account {
    pub id: AccountId,
    pub email: Email,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    /// Set once the registration OTP has been verified.
    pub email_verified: bool,
    /// Argon2id PHC string of the current password.
    pub password_hash: String,
    /// Most-recent-first, capped, includes the current hash.
    pub password_history: Vec<String>,
    pub password_changed_at: DateTime<Utc>,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub verification_code: Option<IssuedCode>,
    pub reset_code: Option<IssuedCode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("email_verified", &self.email_verified)
            .field("password_hash", &"[REDACTED]")
            .field("password_history", &self.password_history.len())
            .field("password_changed_at", &self.password_changed_at)
            .field("failed_login_attempts", &self.failed_login_attempts)
            .field("locked_until", &self.locked_until)
            .finish_non_exhaustive()
    }
}

/// Everything needed to insert a freshly registered account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: Email,
    pub name: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub verification_code: IssuedCode,
    pub created_at: DateTime<Utc>,
}

/// Replacement password state written by a reset or a change.
#[derive(Debug, Clone)]
pub struct CredentialUpdate {
    pub password_hash: String,
    pub password_history: Vec<String>,
    pub changed_at: DateTime<Utc>,
}

/// Counter state after a failed login was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLogin {
    pub attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Public view of an account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub id: AccountId,
    pub email: Email,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub email_verified: bool,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            name: account.name.clone(),
            phone: account.phone.clone(),
            role: account.role,
            email_verified: account.email_verified,
            password_changed_at: account.password_changed_at,
            created_at: account.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_issued_code_accepts_until_expiry() {
        let now = Utc::now();
        let code = IssuedCode {
            code: "123456".to_owned(),
            expires_at: now + Duration::minutes(5),
        };
        assert!(code.accepts("123456", now));
        assert!(code.accepts(" 123456 ", now + Duration::minutes(5)));
        assert!(!code.accepts("123456", now + Duration::minutes(5) + Duration::seconds(1)));
        assert!(!code.accepts("654321", now));
    }

    #[test]
    fn test_issued_code_debug_redacts() {
        let code = IssuedCode {
            code: "987654".to_owned(),
            expires_at: Utc::now(),
        };
        assert!(!format!("{code:?}").contains("987654"));
    }
}
