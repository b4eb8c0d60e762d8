//! Order lifecycle.
//!
//! Orders are created from the account's cart with prices read from the
//! catalog at that moment. After creation only the status and the payment
//! record change:
//!
//! ```text
//! PENDING ─▶ CONFIRMED ─▶ PROCESSING ─▶ SHIPPED ─▶ DELIVERED
//!    │           │
//!    └───────────┴──▶ CANCELLED
//! ```
//!
//! Staff may move an order forward, skipping steps. Customers may only
//! cancel, and only from `PENDING` or `CONFIRMED`. Every status write is a
//! compare-and-set against the status that was checked.

mod cart;
mod error;
mod shipping;

pub use cart::{CartEntry, CartService, CartView};
pub use error::OrderError;
pub use shipping::ShippingRates;

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::instrument;

use ratna_core::{
    AccountId, Clock, OrderNumber, OrderNumberError, OrderStatus, PaymentMethod, Price,
    ShippingRateId,
};

use super::notify;
use crate::db::{
    CartStore, CatalogLookup, NotificationSink, OrderStore, RepositoryError, ShippingRateStore,
};
use crate::models::{NewOrder, Order, OrderItem, ShippingAddress};
use crate::services::auth::Session;

/// Attempts at a fresh order number before giving up on a conflict.
const MAX_NUMBER_ATTEMPTS: u32 = 5;

/// Mints order numbers from a time fragment and a process-wide sequence.
///
/// The sequence starts at a random offset so that two processes minting in
/// the same millisecond are unlikely to collide; the unique constraint on
/// the order number catches the rest.
#[derive(Debug)]
pub struct OrderNumbers {
    prefix: String,
    sequence: AtomicU32,
}

impl OrderNumbers {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sequence: AtomicU32::new(rand::random_range(0..10_000)),
        }
    }

    /// Next order number for `at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is not 2-6 uppercase letters.
    pub fn mint(&self, at: DateTime<Utc>) -> Result<OrderNumber, OrderNumberError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        OrderNumber::generate(&self.prefix, at, sequence)
    }
}

/// What the customer submits at checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrder {
    pub shipping_rate_id: ShippingRateId,
    pub payment_method: PaymentMethod,
    pub shipping_address: ShippingAddress,
}

/// Order operations.
pub struct OrderLifecycle<'a, S: ?Sized> {
    store: &'a S,
    clock: &'a dyn Clock,
    numbers: &'a OrderNumbers,
}

impl<'a, S> OrderLifecycle<'a, S>
where
    S: OrderStore + CartStore + CatalogLookup + ShippingRateStore + NotificationSink + ?Sized,
{
    #[must_use]
    pub const fn new(store: &'a S, clock: &'a dyn Clock, numbers: &'a OrderNumbers) -> Self {
        Self {
            store,
            clock,
            numbers,
        }
    }

    /// Turn the account's cart into a `PENDING` order and clear the cart.
    ///
    /// # Errors
    ///
    /// - `OrderError::EmptyCart` if the cart has no lines
    /// - `OrderError::InvalidShipping` if the rate is unknown or inactive
    /// - `OrderError::Validation` for a blank address field or a product
    ///   that is gone or unavailable
    ///
    /// The cart is untouched on every error.
    #[instrument(skip(self, request), fields(account_id = %account))]
    pub async fn create(&self, account: AccountId, request: PlaceOrder) -> Result<Order, OrderError> {
        let lines = self.store.cart_lines(account).await?;
        if lines.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let rate = self
            .store
            .shipping_rate(request.shipping_rate_id)
            .await?
            .filter(|rate| rate.is_active)
            .ok_or(OrderError::InvalidShipping)?;

        let missing = request.shipping_address.missing_fields();
        if !missing.is_empty() {
            return Err(OrderError::Validation(format!(
                "shipping address is missing: {}",
                missing.join(", ")
            )));
        }

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self
                .store
                .product(line.product_id)
                .await?
                .filter(|product| product.is_available)
                .ok_or_else(|| {
                    OrderError::Validation(format!(
                        "product {} is no longer available",
                        line.product_id
                    ))
                })?;
            items.push(OrderItem {
                product_id: product.id,
                name: product.name,
                quantity: line.quantity,
                unit_price: product.price,
            });
        }
        let subtotal: Price = items.iter().map(OrderItem::line_total).sum();

        let now = self.clock.now();
        let mut attempt = 0;
        let order = loop {
            attempt += 1;
            let new_order = NewOrder {
                order_number: self.numbers.mint(now)?,
                account_id: account,
                items: items.clone(),
                shipping_rate_id: rate.id,
                shipping_method: rate.name.clone(),
                shipping_address: request.shipping_address.clone(),
                payment_method: request.payment_method,
                subtotal,
                shipping_cost: rate.cost,
                created_at: now,
            };
            match self.store.create_order_from_cart(new_order).await {
                Ok(order) => break order,
                Err(RepositoryError::Conflict(_)) if attempt < MAX_NUMBER_ATTEMPTS => {
                    tracing::warn!(attempt, "Order number collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        };

        notify(
            self.store,
            account,
            &format!(
                "Order {} placed. Total {}.",
                order.order_number,
                order.total()
            ),
            now,
        )
        .await;

        tracing::info!(
            order_number = %order.order_number,
            total = %order.total(),
            "Order created"
        );
        Ok(order)
    }

    /// Move an order to `target` from the admin console.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` for an unknown number and
    /// `OrderError::State` if the move is not allowed from the current
    /// status, including when the status changed concurrently.
    #[instrument(skip(self), fields(order_number = %number, target = %target))]
    pub async fn transition_status(
        &self,
        number: &OrderNumber,
        target: OrderStatus,
    ) -> Result<Order, OrderError> {
        let order = self.require(number).await?;
        if !order.status.can_transition_to(target) {
            return Err(OrderError::State {
                from: order.status,
                to: target,
            });
        }
        let order = self.swap_status(order, target).await?;

        notify(
            self.store,
            order.account_id,
            &format!("Order {} is now {}.", order.order_number, order.status),
            order.updated_at,
        )
        .await;
        tracing::info!(order_number = %order.order_number, status = %order.status, "Order status changed");
        Ok(order)
    }

    /// Cancel an order on behalf of the customer who placed it.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Forbidden` for someone else's order and
    /// `OrderError::State` unless the order is `PENDING` or `CONFIRMED`.
    #[instrument(skip(self), fields(order_number = %number, account_id = %account))]
    pub async fn cancel_by_owner(
        &self,
        number: &OrderNumber,
        account: AccountId,
    ) -> Result<Order, OrderError> {
        let order = self.require(number).await?;
        if order.account_id != account {
            return Err(OrderError::Forbidden);
        }
        if !order.status.is_cancellable() {
            return Err(OrderError::State {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }
        let order = self.swap_status(order, OrderStatus::Cancelled).await?;

        notify(
            self.store,
            account,
            &format!("Order {} was cancelled.", order.order_number),
            order.updated_at,
        )
        .await;
        tracing::info!(order_number = %order.order_number, "Order cancelled by customer");
        Ok(order)
    }

    async fn swap_status(&self, order: Order, target: OrderStatus) -> Result<Order, OrderError> {
        let now = self.clock.now();
        if self
            .store
            .transition_status(order.id, order.status, target, now)
            .await?
        {
            return Ok(Order {
                status: target,
                updated_at: now,
                ..order
            });
        }

        // Lost a race; report against whatever the status is now.
        let current = self
            .store
            .order_by_id(order.id)
            .await?
            .ok_or(OrderError::NotFound)?;
        Err(OrderError::State {
            from: current.status,
            to: target,
        })
    }

    async fn require(&self, number: &OrderNumber) -> Result<Order, OrderError> {
        self.store
            .order_by_number(number)
            .await?
            .ok_or(OrderError::NotFound)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// An order visible to `session`: its owner, or any admin.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order does not exist or belongs
    /// to another account.
    pub async fn order_for(
        &self,
        number: &OrderNumber,
        session: &Session,
    ) -> Result<Order, OrderError> {
        let order = self.require(number).await?;
        if order.account_id == session.account_id
            || session.role.satisfies(ratna_core::Role::Admin)
        {
            Ok(order)
        } else {
            Err(OrderError::NotFound)
        }
    }

    /// Orders placed by `account`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` on storage failure.
    pub async fn orders_of(&self, account: AccountId) -> Result<Vec<Order>, OrderError> {
        Ok(self.store.orders_for_account(account).await?)
    }

    /// Most recent orders for the admin console.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` on storage failure.
    pub async fn list(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
    ) -> Result<Vec<Order>, OrderError> {
        Ok(self.store.list_orders(status, limit.clamp(1, 200)).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use ratna_core::{Email, ManualClock, ProductId, Role};

    use super::*;
    use crate::db::AccountStore;
    use crate::db::MemoryStore;
    use crate::models::{CartLine, IssuedCode, NewAccount, NewShippingRate};

    struct Fixture {
        store: MemoryStore,
        clock: ManualClock,
        numbers: OrderNumbers,
        account: AccountId,
        rate: ShippingRateId,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = MemoryStore::new();
            let clock = ManualClock::default();
            let now = clock.now();
            let account = store
                .create_account(NewAccount {
                    email: Email::parse("buyer@example.com").unwrap(),
                    name: "Buyer".to_owned(),
                    phone: None,
                    password_hash: "hash".to_owned(),
                    verification_code: IssuedCode {
                        code: "123456".to_owned(),
                        expires_at: now,
                    },
                    created_at: now,
                })
                .await
                .unwrap()
                .id;
            let rate = store
                .create_shipping_rate(
                    &NewShippingRate {
                        name: "Standard".to_owned(),
                        cost: Price::from_rupees(100),
                        is_active: true,
                        estimated_delivery: None,
                    },
                    now,
                )
                .await
                .unwrap()
                .id;
            Self {
                store,
                clock,
                numbers: OrderNumbers::new("RTN"),
                account,
                rate,
            }
        }

        fn lifecycle(&self) -> OrderLifecycle<'_, MemoryStore> {
            OrderLifecycle::new(&self.store, &self.clock, &self.numbers)
        }

        async fn fill_cart(&self, price: u32, quantity: u32) {
            let product = self
                .store
                .insert_product("Silver anklet", Price::from_rupees(price), true)
                .await;
            self.store
                .upsert_cart_line(
                    self.account,
                    CartLine {
                        product_id: product,
                        quantity,
                    },
                    self.clock.now(),
                )
                .await
                .unwrap();
        }

        fn request(&self) -> PlaceOrder {
            PlaceOrder {
                shipping_rate_id: self.rate,
                payment_method: PaymentMethod::CashOnDelivery,
                shipping_address: serde_json::from_value(serde_json::json!({
                    "full_name": "Buyer",
                    "street": "New Road 1",
                    "city": "Kathmandu",
                    "province": "Bagmati",
                    "phone": "9800000000",
                    "email": "buyer@example.com"
                }))
                .unwrap(),
            }
        }

        async fn placed(&self) -> Order {
            self.fill_cart(2500, 2).await;
            self.lifecycle()
                .create(self.account, self.request())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_create_snapshots_prices_and_clears_cart() {
        let fx = Fixture::new().await;
        let order = fx.placed().await;

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.subtotal, Price::from_rupees(5000));
        assert_eq!(order.shipping_cost, Price::from_rupees(100));
        assert_eq!(order.total(), Price::from_rupees(5100));
        assert_eq!(order.shipping_method, "Standard");
        assert!(fx.store.cart_lines(fx.account).await.unwrap().is_empty());

        // A later price change does not touch the stored order.
        fx.store
            .update_product(order.items[0].product_id, Price::from_rupees(9999), true)
            .await;
        let reloaded = fx
            .store
            .order_by_number(&order.order_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.total(), Price::from_rupees(5100));
    }

    #[tokio::test]
    async fn test_cart_changes_after_pricing_survive_the_order() {
        let fx = Fixture::new().await;
        let now = fx.clock.now();
        let ring = fx.store.insert_product("Ring", Price::from_rupees(1000), true).await;
        let bangle = fx.store.insert_product("Bangle", Price::from_rupees(1000), true).await;
        let nose_pin = fx.store.insert_product("Nose pin", Price::from_rupees(1000), true).await;
        let set = |product_id: ProductId, quantity: u32| {
            fx.store
                .upsert_cart_line(fx.account, CartLine { product_id, quantity }, now)
        };
        set(ring, 1).await.unwrap();
        set(bangle, 2).await.unwrap();

        let items: Vec<OrderItem> = fx
            .store
            .cart_lines(fx.account)
            .await
            .unwrap()
            .into_iter()
            .map(|line| OrderItem {
                product_id: line.product_id,
                name: "Snapshot".to_owned(),
                quantity: line.quantity,
                unit_price: Price::from_rupees(1000),
            })
            .collect();

        // The customer keeps shopping before the order is written.
        set(bangle, 5).await.unwrap();
        set(nose_pin, 1).await.unwrap();

        fx.store
            .create_order_from_cart(NewOrder {
                order_number: fx.numbers.mint(now).unwrap(),
                account_id: fx.account,
                items,
                shipping_rate_id: fx.rate,
                shipping_method: "Standard".to_owned(),
                shipping_address: fx.request().shipping_address,
                payment_method: PaymentMethod::CashOnDelivery,
                subtotal: Price::from_rupees(3000),
                shipping_cost: Price::from_rupees(100),
                created_at: now,
            })
            .await
            .unwrap();

        let mut left = fx.store.cart_lines(fx.account).await.unwrap();
        left.sort_by_key(|line| line.product_id);
        let left: Vec<_> = left.iter().map(|l| (l.product_id, l.quantity)).collect();
        let mut expected = vec![(bangle, 5), (nose_pin, 1)];
        expected.sort_by_key(|(product, _)| *product);
        assert_eq!(left, expected);
    }

    #[tokio::test]
    async fn test_empty_cart_rejected_without_order() {
        let fx = Fixture::new().await;
        assert!(matches!(
            fx.lifecycle().create(fx.account, fx.request()).await,
            Err(OrderError::EmptyCart)
        ));
        assert!(fx.store.orders_for_account(fx.account).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_rate_keeps_cart() {
        let fx = Fixture::new().await;
        fx.fill_cart(1000, 1).await;
        fx.store
            .update_shipping_rate(
                fx.rate,
                &NewShippingRate {
                    name: "Standard".to_owned(),
                    cost: Price::from_rupees(100),
                    is_active: false,
                    estimated_delivery: None,
                },
                fx.clock.now(),
            )
            .await
            .unwrap();

        assert!(matches!(
            fx.lifecycle().create(fx.account, fx.request()).await,
            Err(OrderError::InvalidShipping)
        ));
        assert_eq!(fx.store.cart_lines(fx.account).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_product_rejected() {
        let fx = Fixture::new().await;
        fx.fill_cart(1000, 1).await;
        let product = fx.store.cart_lines(fx.account).await.unwrap()[0].product_id;
        fx.store
            .update_product(product, Price::from_rupees(1000), false)
            .await;
        assert!(matches!(
            fx.lifecycle().create(fx.account, fx.request()).await,
            Err(OrderError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_order_numbers_distinct_in_tight_loop() {
        let fx = Fixture::new().await;
        let mut seen = HashSet::new();
        for _ in 0..100 {
            fx.fill_cart(10, 1).await;
            let order = fx
                .lifecycle()
                .create(fx.account, fx.request())
                .await
                .unwrap();
            assert!(seen.insert(order.order_number));
        }
    }

    #[tokio::test]
    async fn test_owner_cancel_only_early() {
        let fx = Fixture::new().await;
        let order = fx.placed().await;
        let lifecycle = fx.lifecycle();

        assert!(matches!(
            lifecycle
                .cancel_by_owner(&order.order_number, AccountId::new(999))
                .await,
            Err(OrderError::Forbidden)
        ));

        lifecycle
            .transition_status(&order.order_number, OrderStatus::Processing)
            .await
            .unwrap();
        assert!(matches!(
            lifecycle
                .cancel_by_owner(&order.order_number, fx.account)
                .await,
            Err(OrderError::State { .. })
        ));
        let reloaded = fx
            .store
            .order_by_number(&order.order_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_owner_cancel_from_confirmed() {
        let fx = Fixture::new().await;
        let order = fx.placed().await;
        let lifecycle = fx.lifecycle();
        lifecycle
            .transition_status(&order.order_number, OrderStatus::Confirmed)
            .await
            .unwrap();
        let cancelled = lifecycle
            .cancel_by_owner(&order.order_number, fx.account)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        // Terminal.
        assert!(matches!(
            lifecycle
                .transition_status(&order.order_number, OrderStatus::Shipped)
                .await,
            Err(OrderError::State { .. })
        ));
    }

    #[tokio::test]
    async fn test_admin_transition_forward_only() {
        let fx = Fixture::new().await;
        let order = fx.placed().await;
        let lifecycle = fx.lifecycle();

        lifecycle
            .transition_status(&order.order_number, OrderStatus::Shipped)
            .await
            .unwrap();
        assert!(matches!(
            lifecycle
                .transition_status(&order.order_number, OrderStatus::Pending)
                .await,
            Err(OrderError::State {
                from: OrderStatus::Shipped,
                to: OrderStatus::Pending
            })
        ));
        assert!(matches!(
            lifecycle
                .transition_status(&order.order_number, OrderStatus::Shipped)
                .await,
            Err(OrderError::State { .. })
        ));

        let notes = fx.store.notifications_for(fx.account, 10).await.unwrap();
        assert!(notes[0].message.contains("SHIPPED"));
    }

    #[tokio::test]
    async fn test_order_for_hides_other_accounts() {
        let fx = Fixture::new().await;
        let order = fx.placed().await;
        let stranger = Session {
            account_id: AccountId::new(999),
            email: Email::parse("x@example.com").unwrap(),
            role: Role::User,
            expires_at: fx.clock.now(),
        };
        assert!(matches!(
            fx.lifecycle().order_for(&order.order_number, &stranger).await,
            Err(OrderError::NotFound)
        ));

        let admin = Session {
            role: Role::Admin,
            ..stranger
        };
        fx.lifecycle()
            .order_for(&order.order_number, &admin)
            .await
            .unwrap();
    }
}
