//! Provider webhook signature verification and event parsing.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;

use ratna_core::{OrderId, OrderNumber, PaymentStatus};

/// Decides whether a webhook body really came from the provider.
pub trait SignatureVerifier: Send + Sync {
    /// Check `signature_header` against the raw request body at `now`.
    fn verify(&self, raw_body: &[u8], signature_header: &str, now: DateTime<Utc>) -> bool;
}

/// Verifies `Stripe-Signature: t=<unix>,v1=<hex>` headers.
///
/// The MAC is HMAC-SHA256 over `"{t}.{body}"`. Headers older or newer than
/// the tolerance are rejected to stop replays.
#[derive(Clone)]
pub struct StripeSignatureVerifier {
    secret: SecretString,
    tolerance: Duration,
}

impl std::fmt::Debug for StripeSignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeSignatureVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl StripeSignatureVerifier {
    /// Default replay window.
    pub const TOLERANCE_SECS: i64 = 300;

    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance: Duration::seconds(Self::TOLERANCE_SECS),
        }
    }

    /// The header the provider would send for `raw_body` at `at`.
    #[must_use]
    pub fn header_for(&self, raw_body: &[u8], at: DateTime<Utc>) -> String {
        let timestamp = at.timestamp();
        format!("t={timestamp},v1={}", self.mac_hex(timestamp, raw_body).unwrap_or_default())
    }

    fn mac_hex(&self, timestamp: i64, raw_body: &[u8]) -> Option<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.expose_secret().as_bytes()).ok()?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(raw_body);
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

impl SignatureVerifier for StripeSignatureVerifier {
    fn verify(&self, raw_body: &[u8], signature_header: &str, now: DateTime<Utc>) -> bool {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let Some(timestamp) = timestamp else {
            return false;
        };
        if (now.timestamp() - timestamp).abs() > self.tolerance.num_seconds() {
            tracing::warn!(timestamp, "Webhook timestamp outside tolerance");
            return false;
        }
        let Some(expected) = self.mac_hex(timestamp, raw_body) else {
            return false;
        };
        signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate))
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct ProviderEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub(super) struct EventData {
    pub object: EventObject,
}

#[derive(Debug, Deserialize)]
pub(super) struct EventObject {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Set on checkout sessions: `paid`, `unpaid` or `no_payment_required`.
    #[serde(default)]
    pub payment_status: Option<String>,
}

/// How an order is named in event metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum OrderRef {
    Id(OrderId),
    Number(OrderNumber),
}

impl ProviderEvent {
    /// Payment status implied by the event, or `None` for events that do
    /// not change payment state.
    ///
    /// A completed checkout session only counts as paid when the session
    /// says so. Delayed methods complete `unpaid` and settle later through
    /// the `async_payment_*` events.
    pub(super) fn payment_status(&self) -> Option<PaymentStatus> {
        match self.kind.as_str() {
            "checkout.session.completed" => (self.data.object.payment_status.as_deref()
                == Some("paid"))
            .then_some(PaymentStatus::Paid),
            "checkout.session.async_payment_succeeded" | "payment_intent.succeeded" => {
                Some(PaymentStatus::Paid)
            }
            "checkout.session.async_payment_failed" | "payment_intent.payment_failed" => {
                Some(PaymentStatus::Failed)
            }
            _ => None,
        }
    }

    /// The internal id when present and well-formed, else the order number.
    pub(super) fn order_ref(&self) -> Option<OrderRef> {
        let metadata = &self.data.object.metadata;
        metadata
            .get("order_id")
            .and_then(|id| id.parse().ok())
            .map(OrderRef::Id)
            .or_else(|| {
                metadata
                    .get("order_number")
                    .and_then(|number| OrderNumber::parse(number).ok())
                    .map(OrderRef::Number)
            })
    }

    /// The payment intent id when present, else the object id.
    pub(super) fn transaction_id(&self) -> String {
        let object = &self.data.object;
        match &object.payment_intent {
            Some(serde_json::Value::String(id)) => id.clone(),
            Some(serde_json::Value::Object(intent)) => intent
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| object.id.clone(), str::to_owned),
            _ => object.id.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn verifier() -> StripeSignatureVerifier {
        StripeSignatureVerifier::new(SecretString::from("whsec_test_secret"))
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_verify_accepts_own_header() {
        let now = Utc::now();
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let header = verifier().header_for(body, now);
        assert!(verifier().verify(body, &header, now));
        assert!(verifier().verify(body, &header, now + Duration::seconds(300)));
    }

    #[test]
    fn test_verify_rejects_tampering_and_replay() {
        let now = Utc::now();
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let header = verifier().header_for(body, now);

        assert!(!verifier().verify(br#"{"type":"payment_intent.failed"}"#, &header, now));
        assert!(!verifier().verify(body, &header, now + Duration::seconds(301)));
        assert!(!verifier().verify(body, "v1=deadbeef", now));
        assert!(!verifier().verify(body, "", now));

        let other = StripeSignatureVerifier::new(SecretString::from("whsec_other"));
        assert!(!other.verify(body, &header, now));
    }

    #[test]
    fn test_event_fields() {
        let event: ProviderEvent = serde_json::from_str(
            r#"{
                "id": "evt_1",
                "type": "checkout.session.completed",
                "data": {"object": {
                    "id": "cs_test_1",
                    "payment_intent": "pi_123",
                    "payment_status": "paid",
                    "metadata": {"order_id": "oops", "order_number": "rtn-abc-0001"}
                }}
            }"#,
        )
        .unwrap();
        assert_eq!(event.payment_status(), Some(PaymentStatus::Paid));
        assert_eq!(event.transaction_id(), "pi_123");
        assert_eq!(
            event.order_ref(),
            Some(OrderRef::Number(OrderNumber::parse("RTN-ABC-0001").unwrap()))
        );
    }

    #[test]
    fn test_unpaid_completed_session_has_no_status() {
        let session = |payment_status: &str| -> ProviderEvent {
            serde_json::from_value(serde_json::json!({
                "type": "checkout.session.completed",
                "data": {"object": {"id": "cs_1", "payment_status": payment_status}}
            }))
            .unwrap()
        };
        assert_eq!(session("paid").payment_status(), Some(PaymentStatus::Paid));
        assert_eq!(session("unpaid").payment_status(), None);

        let untagged: ProviderEvent = serde_json::from_str(
            r#"{"type": "checkout.session.completed", "data": {"object": {"id": "cs_1"}}}"#,
        )
        .unwrap();
        assert_eq!(untagged.payment_status(), None);
    }

    #[test]
    fn test_unknown_event_has_no_status() {
        let event: ProviderEvent = serde_json::from_str(
            r#"{"type": "customer.created", "data": {"object": {"id": "cus_1"}}}"#,
        )
        .unwrap();
        assert_eq!(event.payment_status(), None);
        assert_eq!(event.transaction_id(), "cus_1");
        assert_eq!(event.order_ref(), None);
    }
}
