//! Credential strength policy.
//!
//! Applied whenever a password is replaced (reset or change). Registration
//! only enforces the minimum length and the confirmation match.

use serde::Serialize;

/// A single rule a candidate password failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyViolation {
    TooShort,
    TooLong,
    MissingLowercase,
    MissingUppercase,
    MissingDigit,
    MissingSymbol,
}

impl PolicyViolation {
    /// Human-readable description of the rule.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::TooShort => "at least 8 characters",
            Self::TooLong => "at most 64 characters",
            Self::MissingLowercase => "a lowercase letter",
            Self::MissingUppercase => "an uppercase letter",
            Self::MissingDigit => "a digit",
            Self::MissingSymbol => "a symbol",
        }
    }
}

/// Length and character-class requirements for a new password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPolicy {
    /// Minimum length in characters.
    pub min_length: usize,
    /// Maximum length in characters.
    pub max_length: usize,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 64,
        }
    }
}

impl CredentialPolicy {
    /// Check `candidate` against every rule.
    ///
    /// # Errors
    ///
    /// Returns every violated rule, in a stable order.
    pub fn check(&self, candidate: &str) -> Result<(), Vec<PolicyViolation>> {
        let length = candidate.chars().count();
        let mut violations = Vec::new();

        if length < self.min_length {
            violations.push(PolicyViolation::TooShort);
        }
        if length > self.max_length {
            violations.push(PolicyViolation::TooLong);
        }
        if !candidate.chars().any(char::is_lowercase) {
            violations.push(PolicyViolation::MissingLowercase);
        }
        if !candidate.chars().any(char::is_uppercase) {
            violations.push(PolicyViolation::MissingUppercase);
        }
        if !candidate.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PolicyViolation::MissingDigit);
        }
        if !candidate
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
        {
            violations.push(PolicyViolation::MissingSymbol);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// One-line summary of the violated rules, e.g.
    /// `"password must contain a digit, a symbol"`.
    #[must_use]
    pub fn explain(violations: &[PolicyViolation]) -> String {
        let rules: Vec<&str> = violations.iter().map(|v| v.describe()).collect();
        format!("password must contain {}", rules.join(", "))
    }
}
