//! Account security service.
//!
//! Registration with email verification, password login with lockout and
//! credential expiry, password reset by emailed code, and password change.
//!
//! # Lockout
//!
//! Each wrong password increments a per-account counter in one storage
//! write. Reaching the threshold locks the account for a fixed window. The
//! lock is checked before the password, and a lock whose deadline has
//! passed is ignored and reset lazily on the next attempt.
//!
//! # Credential history
//!
//! The account keeps the most recent hashes, current one included. A new
//! password matching any of them is refused.

mod error;
pub mod password;
pub mod token;

pub use error::AuthError;
pub use password::CredentialHasher;
pub use token::{IssuedToken, Session, TokenError, TokenSigner};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use ratna_core::{AccountId, Clock, CredentialPolicy, Email, Role};

use super::email::{self, Mailer};
use super::{audit, notify};
use crate::config::SecurityPolicy;
use crate::db::{AccountStore, ActivityLog, NotificationSink, RepositoryError};
use crate::models::{
    Account, AccountView, ActivityAction, ClientInfo, CredentialUpdate, IssuedCode, NewAccount,
};

/// Minimum password length accepted at registration.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Check that `session` carries at least `required`.
///
/// # Errors
///
/// Returns `AuthError::Forbidden` otherwise.
pub fn authorize(session: &Session, required: Role) -> Result<(), AuthError> {
    if session.role.satisfies(required) {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}

/// Registration input.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub password: String,
    pub confirm_password: String,
}

/// An account waiting for its one-time code.
#[derive(Debug, Clone, Serialize)]
pub struct PendingVerification {
    pub account_id: AccountId,
    pub email: Email,
    pub code_expires_at: DateTime<Utc>,
    /// `false` if the mail could not be dispatched; the client should offer
    /// a resend.
    pub code_sent: bool,
}

/// A successful login or verification.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Set when the password is close to expiry.
    pub warning: Option<String>,
    pub account: AccountView,
}

/// A reset code was issued.
#[derive(Debug, Clone, Serialize)]
pub struct ResetRequested {
    pub code_expires_at: DateTime<Utc>,
    pub code_sent: bool,
}

/// Account security operations.
pub struct AccountSecurity<'a, S: ?Sized> {
    store: &'a S,
    clock: &'a dyn Clock,
    mailer: &'a dyn Mailer,
    hasher: &'a CredentialHasher,
    tokens: &'a TokenSigner,
    policy: SecurityPolicy,
}

impl<'a, S> AccountSecurity<'a, S>
where
    S: AccountStore + NotificationSink + ActivityLog + ?Sized,
{
    /// Create a new account security service.
    #[must_use]
    pub const fn new(
        store: &'a S,
        clock: &'a dyn Clock,
        mailer: &'a dyn Mailer,
        hasher: &'a CredentialHasher,
        tokens: &'a TokenSigner,
        policy: SecurityPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            mailer,
            hasher,
            tokens,
            policy,
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a new account and send its one-time code.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` or `AuthError::Validation` for bad
    /// input, and `AuthError::AlreadyRegistered` for a taken email.
    #[instrument(skip(self, registration, client), fields(email = %registration.email))]
    pub async fn register(
        &self,
        registration: Registration,
        client: &ClientInfo,
    ) -> Result<PendingVerification, AuthError> {
        let email = Email::parse(&registration.email)?;
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(AuthError::Validation("name is required".to_owned()));
        }
        if registration.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        if registration.password != registration.confirm_password {
            return Err(AuthError::Validation("passwords do not match".to_owned()));
        }

        let now = self.clock.now();
        let password_hash = self.hasher.hash(&registration.password)?;
        let code = self.issue_code(self.policy.otp_digits, self.policy.otp_lifetime, now);

        let account = self
            .store
            .create_account(NewAccount {
                email,
                name: name.to_owned(),
                phone: registration
                    .phone
                    .map(|p| p.trim().to_owned())
                    .filter(|p| !p.is_empty()),
                password_hash,
                verification_code: code.clone(),
                created_at: now,
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::AlreadyRegistered,
                other => AuthError::Repository(other),
            })?;

        let code_sent = self.send_verification_code(&account, &code).await;
        notify(
            self.store,
            account.id,
            &format!("Welcome to Ratna, {}!", account.name),
            now,
        )
        .await;
        audit(
            self.store,
            Some(account.id),
            ActivityAction::Registered,
            format!("registered {}", account.email),
            client,
            now,
        )
        .await;

        tracing::info!(account_id = %account.id, "Account registered");

        Ok(PendingVerification {
            account_id: account.id,
            email: account.email,
            code_expires_at: code.expires_at,
            code_sent,
        })
    }

    /// Verify the registration code and log the account in.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCode` if no code is pending, it does not
    /// match, or it has expired.
    #[instrument(skip(self, code, client))]
    pub async fn verify_one_time_code(
        &self,
        email: &str,
        code: &str,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let email = Email::parse(email)?;
        let now = self.clock.now();

        let account = self
            .store
            .account_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCode)?;

        if !self
            .store
            .consume_verification_code(account.id, code.trim(), now)
            .await?
        {
            return Err(AuthError::InvalidCode);
        }

        audit(
            self.store,
            Some(account.id),
            ActivityAction::EmailVerified,
            "email verified".to_owned(),
            client,
            now,
        )
        .await;

        let account = Account {
            email_verified: true,
            verification_code: None,
            ..account
        };
        Ok(self.log_in(&account, now, None))
    }

    /// Issue a fresh one-time code, replacing any pending one.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` for an unknown email and
    /// `AuthError::Validation` if the email is already verified.
    #[instrument(skip(self))]
    pub async fn resend_one_time_code(
        &self,
        email: &str,
    ) -> Result<PendingVerification, AuthError> {
        let email = Email::parse(email)?;
        let account = self
            .store
            .account_by_email(&email)
            .await?
            .ok_or(AuthError::NotFound)?;
        if account.email_verified {
            return Err(AuthError::Validation("email already verified".to_owned()));
        }

        let now = self.clock.now();
        let code = self.issue_code(self.policy.otp_digits, self.policy.otp_lifetime, now);
        self.store
            .replace_verification_code(account.id, code.clone())
            .await?;
        let code_sent = self.send_verification_code(&account, &code).await;

        Ok(PendingVerification {
            account_id: account.id,
            email: account.email,
            code_expires_at: code.expires_at,
            code_sent,
        })
    }

    // =========================================================================
    // Login
    // =========================================================================

    /// Log in with email and password.
    ///
    /// Every attempt is written to the activity log.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` for an unknown email or wrong
    /// password, `AuthError::Locked` while locked (including the attempt
    /// that triggers the lock), `AuthError::NotVerified` before the email
    /// is verified, and `AuthError::CredentialExpired` once the password is
    /// past its maximum age.
    #[instrument(skip(self, password, client))]
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let email = Email::parse(email)?;
        let now = self.clock.now();

        let Some(account) = self.store.account_by_email(&email).await? else {
            audit(
                self.store,
                None,
                ActivityAction::LoginFailed,
                format!("unknown email {email}"),
                client,
                now,
            )
            .await;
            return Err(AuthError::InvalidCredentials);
        };

        if let Some(until) = account.locked_until.filter(|until| *until > now) {
            audit(
                self.store,
                Some(account.id),
                ActivityAction::LoginBlocked,
                format!("attempt while locked until {until}"),
                client,
                now,
            )
            .await;
            return Err(AuthError::Locked { until });
        }

        if !self.hasher.verify(password, &account.password_hash) {
            return Err(self.reject_password(&account, now, client).await?);
        }

        let age = now - account.password_changed_at;
        if age > self.policy.credential_max_age {
            audit(
                self.store,
                Some(account.id),
                ActivityAction::PasswordExpired,
                format!("password is {} days old", age.num_days()),
                client,
                now,
            )
            .await;
            return Err(AuthError::CredentialExpired);
        }

        if !account.email_verified {
            audit(
                self.store,
                Some(account.id),
                ActivityAction::LoginFailed,
                "email not verified".to_owned(),
                client,
                now,
            )
            .await;
            return Err(AuthError::NotVerified);
        }

        self.store.record_successful_login(account.id, now).await?;

        let warning = self.expiry_warning(account.password_changed_at, now);
        audit(
            self.store,
            Some(account.id),
            ActivityAction::LoginSucceeded,
            warning.clone().unwrap_or_else(|| "login".to_owned()),
            client,
            now,
        )
        .await;

        tracing::info!(account_id = %account.id, "Login succeeded");
        Ok(self.log_in(&account, now, warning))
    }

    /// Count a wrong password and produce the error to return.
    async fn reject_password(
        &self,
        account: &Account,
        now: DateTime<Utc>,
        client: &ClientInfo,
    ) -> Result<AuthError, AuthError> {
        let state = self
            .store
            .record_failed_login(
                account.id,
                now,
                self.policy.lockout_threshold,
                now + self.policy.lockout_duration,
            )
            .await?;

        if let Some(until) = state.locked_until.filter(|until| *until > now) {
            tracing::warn!(account_id = %account.id, attempts = state.attempts, "Account locked");
            audit(
                self.store,
                Some(account.id),
                ActivityAction::AccountLocked,
                format!("locked after {} failed attempts", state.attempts),
                client,
                now,
            )
            .await;
            return Ok(AuthError::Locked { until });
        }

        audit(
            self.store,
            Some(account.id),
            ActivityAction::LoginFailed,
            format!(
                "wrong password, attempt {} of {}",
                state.attempts, self.policy.lockout_threshold
            ),
            client,
            now,
        )
        .await;
        Ok(AuthError::InvalidCredentials)
    }

    /// "password expires in N day(s)" when within the warning window.
    fn expiry_warning(&self, changed_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<String> {
        let remaining = changed_at + self.policy.credential_max_age - now;
        if remaining > self.policy.expiry_warning {
            return None;
        }
        let days = (remaining.num_seconds() + 86_399) / 86_400;
        Some(format!("password expires in {} day(s)", days.max(1)))
    }

    fn log_in(&self, account: &Account, now: DateTime<Utc>, warning: Option<String>) -> LoginOutcome {
        let issued = self.tokens.issue(account, now, self.policy.token_lifetime);
        LoginOutcome {
            token: issued.token,
            expires_at: issued.expires_at,
            warning,
            account: AccountView::from(account),
        }
    }

    // =========================================================================
    // Password reset and change
    // =========================================================================

    /// Email a reset code to the account.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` for an unknown email.
    #[instrument(skip(self, client))]
    pub async fn request_reset(
        &self,
        email: &str,
        client: &ClientInfo,
    ) -> Result<ResetRequested, AuthError> {
        let email = Email::parse(email)?;
        let account = self
            .store
            .account_by_email(&email)
            .await?
            .ok_or(AuthError::NotFound)?;

        let now = self.clock.now();
        let code = self.issue_code(self.policy.reset_digits, self.policy.reset_lifetime, now);
        self.store
            .replace_reset_code(account.id, code.clone())
            .await?;

        let body = email::reset_body(&code.code, self.policy.reset_lifetime.num_minutes());
        let code_sent = match self
            .mailer
            .send(&account.email, "Reset your Ratna password", &body)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(account_id = %account.id, error = %e, "Failed to send reset code");
                false
            }
        };

        audit(
            self.store,
            Some(account.id),
            ActivityAction::PasswordResetRequested,
            "reset code issued".to_owned(),
            client,
            now,
        )
        .await;

        Ok(ResetRequested {
            code_expires_at: code.expires_at,
            code_sent,
        })
    }

    /// Set a new password using an emailed reset code.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCode` if the code is missing, wrong or
    /// expired, or was discarded after too many wrong guesses,
    /// `AuthError::Policy` for a weak password, and
    /// `AuthError::Reuse` for a recently used one.
    #[instrument(skip(self, code, new_password, client))]
    pub async fn confirm_reset(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
        client: &ClientInfo,
    ) -> Result<(), AuthError> {
        let email = Email::parse(email)?;
        let now = self.clock.now();
        let account = self
            .store
            .account_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCode)?;

        let code = code.trim();
        if !account
            .reset_code
            .as_ref()
            .is_some_and(|issued| issued.accepts(code, now))
        {
            if account.reset_code.is_some()
                && self
                    .store
                    .record_reset_miss(account.id, self.policy.reset_max_misses)
                    .await?
            {
                tracing::warn!(account_id = %account.id, "Reset code discarded after repeated misses");
            }
            return Err(AuthError::InvalidCode);
        }

        let update = self.prepare_credential(&account, new_password, now)?;
        if !self
            .store
            .replace_credential(account.id, &account.password_hash, Some(code), update)
            .await?
        {
            return Err(AuthError::InvalidCode);
        }

        notify(
            self.store,
            account.id,
            "Your password was reset.",
            now,
        )
        .await;
        audit(
            self.store,
            Some(account.id),
            ActivityAction::PasswordReset,
            "password reset with code".to_owned(),
            client,
            now,
        )
        .await;

        tracing::info!(account_id = %account.id, "Password reset");
        Ok(())
    }

    /// Change the password of a logged-in account.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if `current_password` is
    /// wrong, `AuthError::Policy` for a weak password, and
    /// `AuthError::Reuse` for a recently used one.
    #[instrument(skip(self, current_password, new_password, client))]
    pub async fn change_credential(
        &self,
        account_id: AccountId,
        current_password: &str,
        new_password: &str,
        client: &ClientInfo,
    ) -> Result<(), AuthError> {
        let account = self
            .store
            .account_by_id(account_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !self.hasher.verify(current_password, &account.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        let now = self.clock.now();
        let update = self.prepare_credential(&account, new_password, now)?;
        if !self
            .store
            .replace_credential(account.id, &account.password_hash, None, update)
            .await?
        {
            // Changed concurrently; the current password no longer matches.
            return Err(AuthError::InvalidCredentials);
        }

        notify(
            self.store,
            account.id,
            "Your password was changed.",
            now,
        )
        .await;
        audit(
            self.store,
            Some(account.id),
            ActivityAction::PasswordChanged,
            "password changed".to_owned(),
            client,
            now,
        )
        .await;

        tracing::info!(account_id = %account.id, "Password changed");
        Ok(())
    }

    /// Policy and reuse checks, then the new hash and history.
    fn prepare_credential(
        &self,
        account: &Account,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<CredentialUpdate, AuthError> {
        CredentialPolicy::default()
            .check(new_password)
            .map_err(AuthError::Policy)?;

        if self.hasher.verify(new_password, &account.password_hash)
            || self
                .hasher
                .matches_any(new_password, &account.password_history)
        {
            return Err(AuthError::Reuse);
        }

        let password_hash = self.hasher.hash(new_password)?;
        let mut password_history = Vec::with_capacity(self.policy.history_depth);
        password_history.push(password_hash.clone());
        password_history.extend(
            account
                .password_history
                .iter()
                .take(self.policy.history_depth.saturating_sub(1))
                .cloned(),
        );

        Ok(CredentialUpdate {
            password_hash,
            password_history,
            changed_at: now,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Load the account behind a session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if the account no longer exists.
    pub async fn current_account(&self, session: &Session) -> Result<AccountView, AuthError> {
        self.store
            .account_by_id(session.account_id)
            .await?
            .map(|account| AccountView::from(&account))
            .ok_or(AuthError::NotFound)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn issue_code(&self, digits: u32, lifetime: chrono::Duration, now: DateTime<Utc>) -> IssuedCode {
        IssuedCode {
            code: email::generate_numeric_code(digits),
            expires_at: now + lifetime,
        }
    }

    async fn send_verification_code(&self, account: &Account, code: &IssuedCode) -> bool {
        let body = email::verification_body(
            &account.name,
            &code.code,
            self.policy.otp_lifetime.num_minutes(),
        );
        match self
            .mailer
            .send(&account.email, "Verify your Ratna account", &body)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    account_id = %account.id,
                    error = %e,
                    "Failed to send verification code"
                );
                false
            }
        }
    }
}
