//! Human-facing order numbers.
//!
//! Format: `PREFIX-<time fragment>-<sequence>`, e.g. `RTN-MB3K9Z1Q-0042`.
//! The time fragment is the creation time in milliseconds since the Unix
//! epoch, base-36 encoded, so numbers sort roughly by creation time and stay
//! short. The sequence is a zero-padded 4-digit counter that separates
//! numbers minted within the same millisecond.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SEQUENCE_MODULUS: u32 = 10_000;

/// Errors that can occur when parsing an [`OrderNumber`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderNumberError {
    /// Not three dash-separated parts.
    #[error("order number must look like PREFIX-FRAGMENT-SEQUENCE")]
    Shape,
    /// Prefix is not 2-6 uppercase ASCII letters.
    #[error("order number prefix must be 2-6 uppercase letters")]
    Prefix,
    /// Time fragment is not uppercase base-36.
    #[error("order number time fragment is invalid")]
    Fragment,
    /// Sequence is not four digits.
    #[error("order number sequence must be 4 digits")]
    Sequence,
}

/// A validated order number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Build an order number from its parts.
    ///
    /// `sequence` is reduced modulo 10 000.
    ///
    /// # Errors
    ///
    /// Returns [`OrderNumberError::Prefix`] if `prefix` is not 2-6 uppercase
    /// ASCII letters.
    pub fn generate(
        prefix: &str,
        at: DateTime<Utc>,
        sequence: u32,
    ) -> Result<Self, OrderNumberError> {
        validate_prefix(prefix)?;
        let millis = u64::try_from(at.timestamp_millis()).unwrap_or_default();
        Ok(Self(format!(
            "{prefix}-{}-{:04}",
            to_base36(millis),
            sequence % SEQUENCE_MODULUS
        )))
    }

    /// Parse an order number received from a client.
    ///
    /// Input is trimmed and uppercased before validation.
    ///
    /// # Errors
    ///
    /// Returns an [`OrderNumberError`] naming the malformed part.
    pub fn parse(s: &str) -> Result<Self, OrderNumberError> {
        let normalized = s.trim().to_ascii_uppercase();
        let mut parts = normalized.split('-');
        let (Some(prefix), Some(fragment), Some(sequence), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(OrderNumberError::Shape);
        };

        validate_prefix(prefix)?;

        if fragment.is_empty() || !fragment.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(OrderNumberError::Fragment);
        }

        if sequence.len() != 4 || !sequence.chars().all(|c| c.is_ascii_digit()) {
            return Err(OrderNumberError::Sequence);
        }

        Ok(Self(normalized))
    }

    /// Returns the order number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_prefix(prefix: &str) -> Result<(), OrderNumberError> {
    if (2..=6).contains(&prefix.len()) && prefix.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(OrderNumberError::Prefix)
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::new();
    while value > 0 {
        let digit = usize::try_from(value % 36).unwrap_or_default();
        out.push(DIGITS.get(digit).copied().unwrap_or(b'0'));
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for OrderNumber {
    type Err = OrderNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = OrderNumberError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderNumber> for String {
    fn from(number: OrderNumber) -> Self {
        number.0
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for OrderNumber {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for OrderNumber {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self(s))
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for OrderNumber {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
