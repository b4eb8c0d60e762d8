//! Signed session tokens.
//!
//! Format: `base64url(claims JSON) "." base64url(HMAC-SHA256(claims part))`,
//! both parts unpadded. The claims carry the account id, email, role and
//! issue/expiry times in Unix seconds.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use ratna_core::{AccountId, Email, Role};

use crate::models::Account;

/// Errors that can occur when verifying a token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Not two base64url parts, or the claims do not decode.
    #[error("malformed token")]
    Malformed,

    /// MAC does not match.
    #[error("invalid token signature")]
    BadSignature,

    /// Past its expiry.
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: AccountId,
    email: Email,
    role: Role,
    iat: i64,
    exp: i64,
}

/// A verified session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub account_id: AccountId,
    pub email: Email,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

/// A freshly issued token.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies session tokens with one secret key.
#[derive(Clone)]
pub struct TokenSigner {
    mac: Hmac<Sha256>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl TokenSigner {
    /// Create a signer keyed with `key`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLength` if the MAC rejects the key.
    pub fn new(key: &SecretString) -> Result<Self, hmac::digest::InvalidLength> {
        let mac = Hmac::<Sha256>::new_from_slice(key.expose_secret().as_bytes())?;
        Ok(Self { mac })
    }

    /// Issue a token for `account` valid for `lifetime` from `now`.
    #[must_use]
    pub fn issue(&self, account: &Account, now: DateTime<Utc>, lifetime: Duration) -> IssuedToken {
        let expires_at = now + lifetime;
        let claims = Claims {
            sub: account.id,
            email: account.email.clone(),
            role: account.role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        // Serializing plain ids, strings and integers cannot fail.
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        IssuedToken {
            token: format!("{payload}.{signature}"),
            expires_at,
        }
    }

    /// Verify `token` at `now`.
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] if the token is malformed, forged or expired.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Session, TokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;

        let expires_at =
            DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or(TokenError::Malformed)?;
        if now >= expires_at {
            return Err(TokenError::Expired);
        }

        Ok(Session {
            account_id: claims.sub,
            email: claims.email,
            role: claims.role,
            expires_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn account(role: Role) -> Account {
        let now = Utc::now();
        Account {
            id: AccountId::new(7),
            email: Email::parse("a@b.com").unwrap(),
            name: "A".to_owned(),
            phone: None,
            role,
            email_verified: true,
            password_hash: String::new(),
            password_history: Vec::new(),
            password_changed_at: now,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            verification_code: None,
            reset_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn signer() -> TokenSigner {
        TokenSigner::new(&SecretString::from("k3Y!9qZ@r7#vP2$wX5&nB8*mC4^tL6%d")).unwrap()
    }

    #[test]
    fn test_issue_then_verify() {
        let now = Utc::now();
        let issued = signer().issue(&account(Role::Admin), now, Duration::hours(24));
        let session = signer().verify(&issued.token, now).unwrap();
        assert_eq!(session.account_id, AccountId::new(7));
        assert_eq!(session.role, Role::Admin);
        assert_eq!(session.email.as_str(), "a@b.com");
    }

    #[test]
    fn test_expired_token_rejected() {
        let now = Utc::now();
        let issued = signer().issue(&account(Role::User), now, Duration::hours(24));
        assert_eq!(
            signer().verify(&issued.token, now + Duration::hours(24)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_tampered_token_rejected() {
        let now = Utc::now();
        let issued = signer().issue(&account(Role::User), now, Duration::hours(24));

        // Admin claims carrying a user token's signature.
        let forged_claims = signer().issue(&account(Role::Admin), now, Duration::hours(24));
        let (forged_payload, _) = forged_claims.token.split_once('.').unwrap();
        let (_, signature) = issued.token.split_once('.').unwrap();
        let forged = format!("{forged_payload}.{signature}");
        assert_eq!(
            signer().verify(&forged, now),
            Err(TokenError::BadSignature)
        );

        let other =
            TokenSigner::new(&SecretString::from("another-key-entirely-9f8e7d6c5b4a")).unwrap();
        assert_eq!(
            other.verify(&issued.token, now),
            Err(TokenError::BadSignature)
        );
        assert_eq!(signer().verify("garbage", now), Err(TokenError::Malformed));
    }
}
