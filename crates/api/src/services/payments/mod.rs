//! Payment reconciliation.
//!
//! Payment state reaches an order two ways: staff set it directly from the
//! admin console, or the card provider reports it through a signed webhook.
//! Both paths end in one storage write that records the payment and, for a
//! successful payment, confirms the order if it is still `PENDING`.
//!
//! A successful payment for a cancelled order is recorded but does not
//! reopen the order. That case is logged as an error for staff to refund.

mod gateway;
mod webhook;

pub use gateway::{CheckoutRequest, CheckoutSession, GatewayError, PaymentGateway, StripeGateway};
pub use webhook::{SignatureVerifier, StripeSignatureVerifier};

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;
use url::Url;

use ratna_core::{AccountId, Clock, OrderNumber, OrderStatus, PaymentStatus};

use super::notify;
use crate::db::{NotificationSink, OrderStore, RepositoryError};
use crate::models::{Order, PaymentUpdate};
use webhook::{OrderRef, ProviderEvent};

/// Errors from payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("order not found")]
    NotFound,

    /// The order cannot be paid through a checkout session right now.
    #[error("{0}")]
    NotPayable(String),

    /// Missing or invalid webhook signature.
    #[error("invalid webhook signature")]
    Signature,

    /// The webhook body is not a provider event.
    #[error("malformed webhook payload: {0}")]
    Malformed(String),

    /// Card payments are not configured.
    #[error("card payments are not available")]
    Unavailable,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What a webhook delivery did. Every variant is acknowledged to the
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied {
        order_number: OrderNumber,
        payment_status: PaymentStatus,
        order_status: OrderStatus,
    },
    /// Event type this store does not act on.
    Ignored { event_type: String },
    /// No order matched the event metadata.
    OrderMissing,
}

pub struct PaymentReconciliation<'a, S: ?Sized> {
    store: &'a S,
    clock: &'a dyn Clock,
}

impl<'a, S> PaymentReconciliation<'a, S>
where
    S: OrderStore + NotificationSink + ?Sized,
{
    #[must_use]
    pub const fn new(store: &'a S, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Set the payment status of an order from the admin console.
    ///
    /// `PAID` also confirms a `PENDING` order.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::NotFound` for an unknown order number.
    #[instrument(skip(self), fields(order_number = %number, status = %status))]
    pub async fn set_status_direct(
        &self,
        number: &OrderNumber,
        status: PaymentStatus,
        transaction_id: Option<String>,
    ) -> Result<Order, PaymentError> {
        let order = self
            .store
            .order_by_number(number)
            .await?
            .ok_or(PaymentError::NotFound)?;
        self.apply(&order, status, transaction_id).await
    }

    /// Handle a webhook delivery from the card provider.
    ///
    /// The signature is checked against the raw body before anything is
    /// parsed. Unknown event types and unknown orders are acknowledged so
    /// the provider does not redeliver them.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Signature` for a missing or bad signature and
    /// `PaymentError::Malformed` for a body that is not an event.
    #[instrument(skip_all)]
    pub async fn handle_provider_notification(
        &self,
        verifier: &dyn SignatureVerifier,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookOutcome, PaymentError> {
        let trusted = signature_header
            .is_some_and(|header| verifier.verify(raw_body, header, self.clock.now()));
        if !trusted {
            tracing::warn!("Rejected webhook with invalid signature");
            return Err(PaymentError::Signature);
        }

        let event: ProviderEvent =
            serde_json::from_slice(raw_body).map_err(|e| PaymentError::Malformed(e.to_string()))?;
        tracing::info!(event_id = ?event.id, event_type = %event.kind, "Webhook received");

        let Some(status) = event.payment_status() else {
            tracing::debug!(event_type = %event.kind, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored {
                event_type: event.kind,
            });
        };

        let order = match event.order_ref() {
            Some(OrderRef::Id(id)) => self.store.order_by_id(id).await?,
            Some(OrderRef::Number(number)) => self.store.order_by_number(&number).await?,
            None => None,
        };
        let Some(order) = order else {
            tracing::error!(
                event_id = ?event.id,
                event_type = %event.kind,
                metadata = ?event.data.object.metadata,
                "Payment webhook for unknown order"
            );
            sentry::capture_message(
                &format!(
                    "Payment webhook {} ({}) matched no order",
                    event.id.as_deref().unwrap_or("without id"),
                    event.kind
                ),
                sentry::Level::Error,
            );
            return Ok(WebhookOutcome::OrderMissing);
        };

        let updated = self
            .apply(&order, status, Some(event.transaction_id()))
            .await?;
        Ok(WebhookOutcome::Applied {
            order_number: updated.order_number,
            payment_status: updated.payment.status,
            order_status: updated.status,
        })
    }

    /// Open a hosted checkout session for a customer's card order.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::NotFound` unless `account` owns the order,
    /// `PaymentError::NotPayable` unless it is a `PENDING` card order with a
    /// `PENDING` payment, and `PaymentError::Gateway` if the provider fails.
    #[instrument(skip(self, gateway, return_base), fields(order_number = %number))]
    pub async fn start_checkout(
        &self,
        gateway: &dyn PaymentGateway,
        number: &OrderNumber,
        account: AccountId,
        return_base: &Url,
    ) -> Result<CheckoutSession, PaymentError> {
        let order = self
            .store
            .order_by_number(number)
            .await?
            .filter(|order| order.account_id == account)
            .ok_or(PaymentError::NotFound)?;

        if !order.payment.method.uses_checkout_session() {
            return Err(PaymentError::NotPayable(format!(
                "order is paid by {}",
                order.payment.method
            )));
        }
        if order.status != OrderStatus::Pending || order.payment.status != PaymentStatus::Pending {
            return Err(PaymentError::NotPayable(
                "order is not awaiting payment".to_owned(),
            ));
        }

        let order_url = |outcome: &str| {
            let mut url = return_base.clone();
            url.set_path(&format!("/orders/{}", order.order_number));
            url.set_query(Some(&format!("checkout={outcome}")));
            url.to_string()
        };

        let request = CheckoutRequest {
            order_id: order.id,
            order_number: order.order_number.clone(),
            amount: order.total(),
            customer_email: order.shipping_address.email.clone(),
            success_url: order_url("success"),
            cancel_url: order_url("cancelled"),
        };
        Ok(gateway.create_checkout_session(&request).await?)
    }

    async fn apply(
        &self,
        order: &Order,
        status: PaymentStatus,
        transaction_id: Option<String>,
    ) -> Result<Order, PaymentError> {
        let now = self.clock.now();
        let updated = self
            .store
            .apply_payment(
                order.id,
                PaymentUpdate {
                    status,
                    transaction_id,
                    confirm_if_pending: status == PaymentStatus::Paid,
                    at: now,
                },
            )
            .await?
            .ok_or(PaymentError::NotFound)?;

        if status == PaymentStatus::Paid && updated.status == OrderStatus::Cancelled {
            tracing::error!(
                order_number = %updated.order_number,
                transaction_id = ?updated.payment.transaction_id,
                "Payment received for cancelled order; order left cancelled"
            );
        }

        let message = match status {
            PaymentStatus::Paid => Some(format!(
                "Payment received for order {}.",
                updated.order_number
            )),
            PaymentStatus::Failed => Some(format!(
                "Payment for order {} failed. Please try again.",
                updated.order_number
            )),
            PaymentStatus::Pending => None,
        };
        if let Some(message) = message {
            notify(self.store, updated.account_id, &message, now).await;
        }

        tracing::info!(
            order_number = %updated.order_number,
            payment_status = %updated.payment.status,
            order_status = %updated.status,
            "Payment status applied"
        );
        Ok(updated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration;
    use secrecy::SecretString;

    use ratna_core::{Email, ManualClock, PaymentMethod, Price, ShippingRateId};

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{NewOrder, OrderItem, ShippingAddress};

    struct Fixture {
        store: MemoryStore,
        clock: ManualClock,
        verifier: StripeSignatureVerifier,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MemoryStore::new(),
                clock: ManualClock::default(),
                verifier: StripeSignatureVerifier::new(SecretString::from("whsec_unit")),
            }
        }

        fn payments(&self) -> PaymentReconciliation<'_, MemoryStore> {
            PaymentReconciliation::new(&self.store, &self.clock)
        }

        async fn order(&self, method: PaymentMethod) -> Order {
            let address: ShippingAddress = serde_json::from_value(serde_json::json!({
                "full_name": "Buyer",
                "street": "New Road 1",
                "city": "Kathmandu",
                "province": "Bagmati",
                "phone": "9800000000",
                "email": "buyer@example.com"
            }))
            .unwrap();
            self.store
                .create_order_from_cart(NewOrder {
                    order_number: OrderNumber::parse("RTN-ABC-0001").unwrap(),
                    account_id: AccountId::new(1),
                    items: vec![OrderItem {
                        product_id: ratna_core::ProductId::new(1),
                        name: "Gold bangle".to_owned(),
                        quantity: 2,
                        unit_price: Price::from_rupees(2500),
                    }],
                    shipping_rate_id: ShippingRateId::new(1),
                    shipping_method: "Standard".to_owned(),
                    shipping_address: address,
                    payment_method: method,
                    subtotal: Price::from_rupees(5000),
                    shipping_cost: Price::from_rupees(100),
                    created_at: self.clock.now(),
                })
                .await
                .unwrap()
        }

        async fn deliver(&self, body: &serde_json::Value) -> Result<WebhookOutcome, PaymentError> {
            let raw = serde_json::to_vec(body).unwrap();
            let header = self.verifier.header_for(&raw, self.clock.now());
            self.payments()
                .handle_provider_notification(&self.verifier, &raw, Some(&header))
                .await
        }
    }

    fn event(kind: &str, metadata: serde_json::Value) -> serde_json::Value {
        session_event(kind, "paid", metadata)
    }

    fn session_event(
        kind: &str,
        payment_status: &str,
        metadata: serde_json::Value,
    ) -> serde_json::Value {
        serde_json::json!({
            "id": "evt_1",
            "type": kind,
            "data": {"object": {
                "id": "cs_1",
                "payment_intent": "pi_1",
                "payment_status": payment_status,
                "metadata": metadata
            }}
        })
    }

    #[tokio::test]
    async fn test_direct_paid_confirms_pending_order() {
        let fx = Fixture::new();
        let order = fx.order(PaymentMethod::CashOnDelivery).await;
        let updated = fx
            .payments()
            .set_status_direct(&order.order_number, PaymentStatus::Paid, Some("txn-9".to_owned()))
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Confirmed);
        assert_eq!(updated.payment.status, PaymentStatus::Paid);
        assert_eq!(updated.payment.transaction_id.as_deref(), Some("txn-9"));
        assert_eq!(updated.total(), Price::from_rupees(5100));
    }

    #[tokio::test]
    async fn test_paid_does_not_reopen_cancelled_order() {
        let fx = Fixture::new();
        let order = fx.order(PaymentMethod::CashOnDelivery).await;
        fx.store
            .transition_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled, fx.clock.now())
            .await
            .unwrap();
        let updated = fx
            .payments()
            .set_status_direct(&order.order_number, PaymentStatus::Paid, None)
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Cancelled);
        assert_eq!(updated.payment.status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_direct_unknown_order() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.payments()
                .set_status_direct(
                    &OrderNumber::parse("RTN-ZZZ-9999").unwrap(),
                    PaymentStatus::Paid,
                    None
                )
                .await,
            Err(PaymentError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_webhook_success_by_id_then_failure_by_number() {
        let fx = Fixture::new();
        let order = fx.order(PaymentMethod::CardProvider).await;

        let outcome = fx
            .deliver(&event(
                "checkout.session.completed",
                serde_json::json!({"order_id": order.id.to_string()}),
            ))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                order_number: order.order_number.clone(),
                payment_status: PaymentStatus::Paid,
                order_status: OrderStatus::Confirmed,
            }
        );
        let stored = fx.store.order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment.transaction_id.as_deref(), Some("pi_1"));

        fx.deliver(&event(
            "payment_intent.payment_failed",
            serde_json::json!({"order_number": "RTN-ABC-0001"}),
        ))
        .await
        .unwrap();
        let stored = fx.store.order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_delayed_payment_waits_for_settlement() {
        let fx = Fixture::new();
        let order = fx.order(PaymentMethod::CardProvider).await;
        let metadata = serde_json::json!({"order_id": order.id.to_string()});

        let outcome = fx
            .deliver(&session_event(
                "checkout.session.completed",
                "unpaid",
                metadata.clone(),
            ))
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
        let stored = fx.store.order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment.status, PaymentStatus::Pending);
        assert_eq!(stored.status, OrderStatus::Pending);

        fx.deliver(&session_event(
            "checkout.session.async_payment_failed",
            "unpaid",
            metadata,
        ))
        .await
        .unwrap();
        let stored = fx.store.order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment.status, PaymentStatus::Failed);
        assert_eq!(stored.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_webhook_bad_signature_never_mutates() {
        let fx = Fixture::new();
        let order = fx.order(PaymentMethod::CardProvider).await;
        let raw = serde_json::to_vec(&event(
            "checkout.session.completed",
            serde_json::json!({"order_id": order.id.to_string()}),
        ))
        .unwrap();

        let stale = fx.verifier.header_for(&raw, fx.clock.now() - Duration::minutes(10));
        for header in [None, Some("t=1,v1=00"), Some(stale.as_str())] {
            assert!(matches!(
                fx.payments()
                    .handle_provider_notification(&fx.verifier, &raw, header)
                    .await,
                Err(PaymentError::Signature)
            ));
        }
        let stored = fx.store.order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment.status, PaymentStatus::Pending);
        assert_eq!(stored.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_webhook_unknown_event_and_order_acknowledged() {
        let fx = Fixture::new();
        assert_eq!(
            fx.deliver(&event("charge.refunded", serde_json::json!({})))
                .await
                .unwrap(),
            WebhookOutcome::Ignored {
                event_type: "charge.refunded".to_owned()
            }
        );
        assert_eq!(
            fx.deliver(&event(
                "payment_intent.succeeded",
                serde_json::json!({"order_id": "777"})
            ))
            .await
            .unwrap(),
            WebhookOutcome::OrderMissing
        );
    }

    #[tokio::test]
    async fn test_webhook_malformed_body() {
        let fx = Fixture::new();
        let raw = b"not json";
        let header = fx.verifier.header_for(raw, fx.clock.now());
        assert!(matches!(
            fx.payments()
                .handle_provider_notification(&fx.verifier, raw, Some(&header))
                .await,
            Err(PaymentError::Malformed(_))
        ));
    }

    struct RecordingGateway {
        requests: Mutex<Vec<CheckoutRequest>>,
    }

    #[async_trait]
    impl PaymentGateway for RecordingGateway {
        async fn create_checkout_session(
            &self,
            request: &CheckoutRequest,
        ) -> Result<CheckoutSession, GatewayError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(CheckoutSession {
                id: "cs_test".to_owned(),
                url: "https://checkout.example/cs_test".to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn test_checkout_only_for_pending_card_orders_of_owner() {
        let fx = Fixture::new();
        let gateway = RecordingGateway {
            requests: Mutex::new(Vec::new()),
        };
        let base = Url::parse("https://shop.example").unwrap();
        let order = fx.order(PaymentMethod::CardProvider).await;

        assert!(matches!(
            fx.payments()
                .start_checkout(&gateway, &order.order_number, AccountId::new(2), &base)
                .await,
            Err(PaymentError::NotFound)
        ));

        let session = fx
            .payments()
            .start_checkout(&gateway, &order.order_number, AccountId::new(1), &base)
            .await
            .unwrap();
        assert_eq!(session.id, "cs_test");
        let sent = gateway.requests.lock().unwrap()[0].clone();
        assert_eq!(sent.amount, Price::from_rupees(5100));
        assert_eq!(
            sent.success_url,
            format!("https://shop.example/orders/{}?checkout=success", order.order_number)
        );
        assert_eq!(sent.customer_email, Email::parse("buyer@example.com").unwrap());

        fx.payments()
            .set_status_direct(&order.order_number, PaymentStatus::Paid, None)
            .await
            .unwrap();
        assert!(matches!(
            fx.payments()
                .start_checkout(&gateway, &order.order_number, AccountId::new(1), &base)
                .await,
            Err(PaymentError::NotPayable(_))
        ));
    }
}
