//! Outgoing mail for one-time codes and order messages.
//!
//! Production uses SMTP via lettre. Without SMTP settings the
//! [`LogMailer`] writes messages to the log so codes can still be read
//! during development, and tests use the [`Outbox`] to capture them.

use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType,
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use rand::Rng;
use secrecy::ExposeSecret;
use thiserror::Error;

use ratna_core::Email;

use crate::config::EmailConfig;

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum MailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),
}

/// Message dispatch.
///
/// Delivery is best effort; callers log failures and carry on.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send a plain-text message.
    async fn send(&self, to: &Email, subject: &str, body: &str) -> Result<(), MailError>;
}

// =============================================================================
// SMTP
// =============================================================================

/// SMTP mailer.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    /// Create a new SMTP mailer from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the relay cannot be configured.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &Email, subject: &str, body: &str) -> Result<(), MailError> {
        let message = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| MailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .as_str()
                .parse()
                .map_err(|_| MailError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        self.transport.send(message).await?;

        tracing::info!(to = %to, subject = %subject, "Email sent successfully");
        Ok(())
    }
}

// =============================================================================
// Development and tests
// =============================================================================

/// Writes messages to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &Email, subject: &str, body: &str) -> Result<(), MailError> {
        tracing::warn!(to = %to, subject = %subject, body = %body, "SMTP not configured, email logged");
        Ok(())
    }
}

/// A captured message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: Email,
    pub subject: String,
    pub body: String,
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct Outbox {
    sent: Mutex<Vec<SentMail>>,
    failing: Mutex<bool>,
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail.
    pub fn fail_sends(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }

    /// All messages sent so far.
    #[must_use]
    pub fn messages(&self) -> Vec<SentMail> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent message sent to `to`.
    #[must_use]
    pub fn last_to(&self, to: &Email) -> Option<SentMail> {
        self.messages().into_iter().rev().find(|m| &m.to == to)
    }

    /// Most recent numeric code sent to `to`.
    #[must_use]
    pub fn last_code_for(&self, to: &Email) -> Option<String> {
        self.last_to(to).and_then(|m| extract_code(&m.body))
    }
}

#[async_trait]
impl Mailer for Outbox {
    async fn send(&self, to: &Email, subject: &str, body: &str) -> Result<(), MailError> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(MailError::InvalidAddress(to.to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMail {
                to: to.clone(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}

/// First run of four or more digits in `body`.
fn extract_code(body: &str) -> Option<String> {
    body.split(|c: char| !c.is_ascii_digit())
        .find(|run| run.len() >= 4)
        .map(str::to_string)
}

// =============================================================================
// Codes and message bodies
// =============================================================================

/// Generate a random numeric code with exactly `digits` digits.
///
/// Leading zeros are kept, so every code has the same length.
#[must_use]
pub fn generate_numeric_code(digits: u32) -> String {
    let mut rng = rand::rng();
    (0..digits)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

pub(crate) fn verification_body(name: &str, code: &str, minutes: i64) -> String {
    format!(
        "Hello {name},\n\nYour Ratna verification code is {code}.\n\
         It expires in {minutes} minutes.\n"
    )
}

pub(crate) fn reset_body(code: &str, minutes: i64) -> String {
    format!(
        "Your Ratna password reset code is {code}.\n\
         It expires in {minutes} minutes. If you did not ask for a reset, ignore this email.\n"
    )
}
