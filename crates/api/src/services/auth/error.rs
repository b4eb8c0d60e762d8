//! Account security error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use ratna_core::{EmailError, PolicyViolation};

use super::token::TokenError;
use crate::db::RepositoryError;

/// Errors that can occur during account security operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// Malformed input such as a short password or mismatched confirmation.
    #[error("{0}")]
    Validation(String),

    /// Email already registered.
    #[error("an account with this email already exists")]
    AlreadyRegistered,

    /// Unknown email or wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Too many failed attempts.
    #[error("account locked until {until}")]
    Locked { until: DateTime<Utc> },

    /// Password older than the maximum age; a reset is required.
    #[error("password expired, reset it to continue")]
    CredentialExpired,

    /// Email not yet verified with the one-time code.
    #[error("email not verified")]
    NotVerified,

    /// One-time or reset code missing, wrong or expired.
    #[error("invalid or expired code")]
    InvalidCode,

    /// New password fails the strength rules.
    #[error("{}", ratna_core::CredentialPolicy::explain(.0))]
    Policy(Vec<PolicyViolation>),

    /// New password was used recently.
    #[error("password was used recently, choose a different one")]
    Reuse,

    /// Unknown account.
    #[error("account not found")]
    NotFound,

    /// Session lacks the required role.
    #[error("insufficient permissions")]
    Forbidden,

    /// Missing or invalid session token.
    #[error("invalid session: {0}")]
    Token(#[from] TokenError),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    /// Password hashing error.
    #[error("password hashing error")]
    PasswordHash,
}
