//! Order aggregate.
//!
//! An order is created once from a cart and then only changes through its
//! status and its embedded payment record. Line items, prices and the order
//! number are fixed at creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ratna_core::{
    AccountId, Email, OrderId, OrderNumber, OrderStatus, PaymentMethod, PaymentStatus, Price,
    ProductId, ShippingRateId,
};

/// A purchased product with the price captured at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Price,
}

impl OrderItem {
    /// `quantity × unit_price`.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.times(self.quantity)
    }
}

fn default_country() -> String {
    "Nepal".to_owned()
}

/// Where the order is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub full_name: String,
    pub street: String,
    pub city: String,
    pub province: String,
    #[serde(default = "default_country")]
    pub country: String,
    pub phone: String,
    pub email: Email,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ShippingAddress {
    /// Names of required fields that are blank.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("full_name", &self.full_name),
            ("street", &self.street),
            ("city", &self.city),
            ("province", &self.province),
            ("country", &self.country),
            ("phone", &self.phone),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Payment state embedded in an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRecord {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Identifier assigned by the payment provider, once known.
    pub transaction_id: Option<String>,
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub account_id: AccountId,
    pub items: Vec<OrderItem>,
    pub shipping_rate_id: ShippingRateId,
    /// Name of the shipping rate at creation time.
    pub shipping_method: String,
    pub shipping_address: ShippingAddress,
    pub payment: PaymentRecord,
    pub subtotal: Price,
    pub shipping_cost: Price,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Always `subtotal + shipping_cost`.
    #[must_use]
    pub fn total(&self) -> Price {
        self.subtotal + self.shipping_cost
    }
}

/// JSON view of an order, including the derived total and the statuses the
/// admin console may move it to.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub account_id: AccountId,
    pub items: Vec<OrderItem>,
    pub shipping_rate_id: ShippingRateId,
    pub shipping_method: String,
    pub shipping_address: ShippingAddress,
    pub payment: PaymentRecord,
    pub subtotal: Price,
    pub shipping_cost: Price,
    pub total: Price,
    pub status: OrderStatus,
    pub next_statuses: Vec<OrderStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        let total = order.total();
        Self {
            id: order.id,
            order_number: order.order_number,
            account_id: order.account_id,
            items: order.items,
            shipping_rate_id: order.shipping_rate_id,
            shipping_method: order.shipping_method,
            shipping_address: order.shipping_address,
            payment: order.payment,
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            total,
            status: order.status,
            next_statuses: order.status.next_statuses(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// A fully priced order ready to be stored.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: OrderNumber,
    pub account_id: AccountId,
    pub items: Vec<OrderItem>,
    pub shipping_rate_id: ShippingRateId,
    pub shipping_method: String,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub subtotal: Price,
    pub shipping_cost: Price,
    pub created_at: DateTime<Utc>,
}

/// A payment status change applied in a single storage write.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    /// Replaces the stored id when present; keeps it otherwise.
    pub transaction_id: Option<String>,
    /// Move the order from `PENDING` to `CONFIRMED` in the same write.
    pub confirm_if_pending: bool,
    pub at: DateTime<Utc>,
}
