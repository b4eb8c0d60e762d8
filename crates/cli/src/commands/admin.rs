//! Admin account management.
//!
//! # Usage
//!
//! ```bash
//! # Grant the admin role to a registered account
//! ratna-cli admin promote -e owner@example.com
//!
//! # Take it away again
//! ratna-cli admin demote -e owner@example.com
//! ```
//!
//! Accounts are created through the normal registration flow first; this
//! command only changes the role.

use ratna_api::db::{AccountStore, PgStore, RepositoryError};
use ratna_core::{Email, Role};
use thiserror::Error;

use super::{CommandError, connect};

/// Errors that can occur during admin operations.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Invalid email.
    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    /// No account is registered under the address.
    #[error("No account registered with email: {0}")]
    UnknownAccount(String),

    #[error("Database error: {0}")]
    Repository(RepositoryError),
}

/// Set the role of the account registered under `email`.
///
/// # Errors
///
/// Returns an error if the email is malformed, no account uses it, or the
/// database is unreachable.
pub async fn set_role(email: &str, role: Role) -> Result<(), AdminError> {
    let email = Email::parse(email).map_err(|_| AdminError::InvalidEmail(email.to_owned()))?;

    let store = PgStore::new(connect().await?);
    let account = store.set_role(&email, role).await.map_err(|e| match e {
        RepositoryError::NotFound => AdminError::UnknownAccount(email.to_string()),
        other => AdminError::Repository(other),
    })?;

    tracing::info!(
        "Account updated! ID: {}, Email: {}, Role: {}",
        account.id,
        account.email,
        account.role
    );
    Ok(())
}
