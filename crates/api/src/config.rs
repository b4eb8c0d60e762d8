//! API configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `RATNA_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `RATNA_BASE_URL` - Public URL of the shop, used for checkout redirects
//! - `RATNA_SESSION_SECRET` - Token signing secret (min 32 chars, high entropy)
//!
//! ## Optional
//! - `RATNA_HOST` - Bind address (default: 127.0.0.1)
//! - `RATNA_PORT` - Listen port (default: 3000)
//! - `RATNA_ORDER_PREFIX` - Order number prefix (default: RTN)
//! - `STRIPE_SECRET_KEY` - Card provider API key; card checkout is disabled without it
//! - `STRIPE_WEBHOOK_SECRET` - Webhook signing secret; webhooks are rejected without it
//! - `STRIPE_API_BASE` - Card provider API base URL (default: <https://api.stripe.com>)
//! - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_FROM` -
//!   outgoing mail; when `SMTP_HOST` is unset codes are written to the log instead
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag (default: development)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use chrono::Duration;
use secrecy::SecretString;
use thiserror::Error;

const MIN_SESSION_SECRET_LENGTH: usize = 32;
const MIN_PROVIDER_SECRET_LENGTH: usize = 16;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL of the shop
    pub base_url: String,
    /// Session token signing secret
    pub session_secret: SecretString,
    /// Prefix of generated order numbers
    pub order_prefix: String,
    /// Card provider settings
    pub payments: PaymentConfig,
    /// Outgoing mail, `None` in development
    pub email: Option<EmailConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: String,
    /// Lockout, expiry and one-time code rules
    pub security: SecurityPolicy,
}

/// Card provider configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PaymentConfig {
    /// API base URL
    pub api_base: String,
    /// Secret API key
    pub secret_key: Option<SecretString>,
    /// Webhook signing secret
    pub webhook_secret: Option<SecretString>,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &Option<SecretString>| s.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("PaymentConfig")
            .field("api_base", &self.api_base)
            .field("secret_key", &redact(&self.secret_key))
            .field("webhook_secret", &redact(&self.webhook_secret))
            .finish()
    }
}

/// Email (SMTP) configuration.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct EmailConfig {
    /// SMTP server hostname
    pub smtp_host: String,
    /// SMTP server port
    pub smtp_port: u16,
    /// SMTP authentication username
    pub smtp_username: String,
    /// SMTP authentication password
    pub smtp_password: SecretString,
    /// Email sender address (From header)
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

/// Account security rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPolicy {
    /// Consecutive failures that trigger a lock.
    pub lockout_threshold: i32,
    /// How long a lock lasts.
    pub lockout_duration: Duration,
    /// Passwords older than this cannot be used to log in.
    pub credential_max_age: Duration,
    /// Logins within this window of expiry carry a warning.
    pub expiry_warning: Duration,
    pub otp_digits: u32,
    pub otp_lifetime: Duration,
    pub reset_digits: u32,
    pub reset_lifetime: Duration,
    /// Wrong guesses after which a pending reset code is discarded.
    pub reset_max_misses: i32,
    /// Number of hashes kept in the credential history, current included.
    pub history_depth: usize,
    pub token_lifetime: Duration,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            lockout_threshold: 5,
            lockout_duration: Duration::minutes(15),
            credential_max_age: Duration::days(90),
            expiry_warning: Duration::days(7),
            otp_digits: 6,
            otp_lifetime: Duration::minutes(5),
            reset_digits: 4,
            reset_lifetime: Duration::minutes(15),
            reset_max_misses: 5,
            history_depth: 5,
            token_lifetime: Duration::hours(24),
        }
    }
}

impl ApiConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = database_url("RATNA_DATABASE_URL")?;
        let host: IpAddr = parsed("RATNA_HOST", "127.0.0.1")?;
        let port: u16 = parsed("RATNA_PORT", "3000")?;
        let base_url = required("RATNA_BASE_URL")?;
        url::Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidEnvVar("RATNA_BASE_URL".to_string(), e.to_string()))?;
        let session_secret = secret("RATNA_SESSION_SECRET", MIN_SESSION_SECRET_LENGTH)?;
        let order_prefix = or_default("RATNA_ORDER_PREFIX", "RTN");
        validate_order_prefix(&order_prefix)?;

        let payments = PaymentConfig::from_env()?;
        let email = if optional("SMTP_HOST").is_some() {
            Some(EmailConfig::from_env()?)
        } else {
            None
        };

        Ok(Self {
            database_url,
            host,
            port,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_secret,
            order_prefix,
            payments,
            email,
            sentry_dsn: optional("SENTRY_DSN"),
            sentry_environment: or_default("SENTRY_ENVIRONMENT", "development"),
            security: SecurityPolicy::default(),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl PaymentConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let provider_secret = |key: &str| {
            optional(key)
                .map(|_| secret(key, MIN_PROVIDER_SECRET_LENGTH))
                .transpose()
        };
        let secret_key = provider_secret("STRIPE_SECRET_KEY")?;
        let webhook_secret = provider_secret("STRIPE_WEBHOOK_SECRET")?;

        Ok(Self {
            api_base: or_default("STRIPE_API_BASE", "https://api.stripe.com"),
            secret_key,
            webhook_secret,
        })
    }
}

impl EmailConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            smtp_host: required("SMTP_HOST")?,
            smtp_port: parsed("SMTP_PORT", "587")?,
            smtp_username: required("SMTP_USERNAME")?,
            smtp_password: SecretString::from(required("SMTP_PASSWORD")?),
            from_address: required("SMTP_FROM")?,
        })
    }
}

// =============================================================================
// Environment access
// =============================================================================

fn required(key: &str) -> Result<String, ConfigError> {
    optional(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Unset and blank are the same thing.
fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn or_default(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn parsed<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    or_default(key, default)
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn database_url(key: &str) -> Result<SecretString, ConfigError> {
    optional(key)
        .or_else(|| optional("DATABASE_URL"))
        .map(SecretString::from)
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// A required secret that passes [`check_secret`].
fn secret(key: &str, min_len: usize) -> Result<SecretString, ConfigError> {
    let value = required(key)?;
    check_secret(&value, min_len)
        .map_err(|reason| ConfigError::InsecureSecret(key.to_string(), reason))?;
    Ok(SecretString::from(value))
}

/// Reject short values, known placeholders and low-entropy strings.
fn check_secret(value: &str, min_len: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len < min_len {
        return Err(format!("must be at least {min_len} characters (got {len})"));
    }

    let lower = value.to_lowercase();
    if let Some(pattern) = PLACEHOLDER_PATTERNS.iter().find(|p| lower.contains(**p)) {
        return Err(format!("appears to be a placeholder (contains '{pattern}')"));
    }

    let entropy = bits_per_char(value);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(format!(
            "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}), use a randomly generated value"
        ));
    }
    Ok(())
}

/// Shannon entropy of the character distribution.
fn bits_per_char(value: &str) -> f64 {
    let mut counts: HashMap<char, u32> = HashMap::new();
    for c in value.chars() {
        *counts.entry(c).or_default() += 1;
    }
    let total: u32 = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .values()
        .map(|&n| f64::from(n) / f64::from(total))
        .map(|p| -p * p.log2())
        .sum()
}

fn validate_order_prefix(prefix: &str) -> Result<(), ConfigError> {
    if (2..=6).contains(&prefix.len()) && prefix.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ConfigError::InvalidEnvVar(
            "RATNA_ORDER_PREFIX".to_string(),
            "must be 2-6 uppercase letters".to_string(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_per_char() {
        assert!(bits_per_char("").abs() < f64::EPSILON);
        assert!(bits_per_char("aaaaaaa").abs() < f64::EPSILON);
        assert!((bits_per_char("ab") - 1.0).abs() < 0.01);
        assert!(bits_per_char("aB3$xY9!mK2@nL5#") > 3.3);
    }

    #[test]
    fn test_check_secret() {
        assert!(check_secret("your-api-key-here-0123456789abcdef", 0).is_err());
        assert!(check_secret("changeme123", 0).is_err());
        assert!(check_secret(&"a".repeat(40), 32).is_err());
        assert!(check_secret("q7X!pL2@", 32).unwrap_err().contains("at least 32"));
        assert!(check_secret("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6%", 32).is_ok());
    }

    #[test]
    fn test_validate_order_prefix() {
        assert!(validate_order_prefix("RTN").is_ok());
        assert!(validate_order_prefix("rtn").is_err());
        assert!(validate_order_prefix("R").is_err());
        assert!(validate_order_prefix("RATNAJW").is_err());
    }

    #[test]
    fn test_security_policy_defaults() {
        let policy = SecurityPolicy::default();
        assert_eq!(policy.lockout_threshold, 5);
        assert_eq!(policy.lockout_duration, Duration::minutes(15));
        assert_eq!(policy.credential_max_age, Duration::days(90));
        assert_eq!(policy.otp_digits, 6);
        assert_eq!(policy.reset_digits, 4);
        assert_eq!(policy.reset_max_misses, 5);
        assert_eq!(policy.history_depth, 5);
    }

    #[test]
    fn test_payment_config_debug_redacts_secrets() {
        let config = PaymentConfig {
            api_base: "https://api.stripe.com".to_string(),
            secret_key: Some(SecretString::from("sk_live_abc123")),
            webhook_secret: None,
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk_live_abc123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_email_config_debug_redacts_password() {
        let config = EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_username: "mailer".to_string(),
            smtp_password: SecretString::from("hunter2-very-secret"),
            from_address: "shop@example.com".to_string(),
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
