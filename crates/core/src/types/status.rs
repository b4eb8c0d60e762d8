//! Status enums and the order transition rules.
//!
//! Wire values are SCREAMING_SNAKE_CASE for orders and payments
//! (`PENDING`, `CONFIRMED`, ...) and lowercase for roles (`user`, `admin`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an order.
///
/// The forward path is `PENDING → CONFIRMED → PROCESSING → SHIPPED → DELIVERED`.
/// `CANCELLED` is an escape reachable only from `PENDING` or `CONFIRMED`.
/// `DELIVERED` and `CANCELLED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Every status, forward path first.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Confirmed,
        Self::Processing,
        Self::Shipped,
        Self::Delivered,
        Self::Cancelled,
    ];

    /// Position on the forward path. `None` for `CANCELLED`.
    #[must_use]
    pub const fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Confirmed => Some(1),
            Self::Processing => Some(2),
            Self::Shipped => Some(3),
            Self::Delivered => Some(4),
            Self::Cancelled => None,
        }
    }

    /// No transition leaves a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Whether the customer who placed the order may still cancel it.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Whether the admin console may move an order from `self` to `to`.
    ///
    /// Forward moves may skip steps (`PENDING → SHIPPED` is allowed), moves
    /// backwards or onto the same status are not, and cancellation follows
    /// the same rule as for the customer.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), to.rank()) {
            (_, None) => self.is_cancellable(),
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }

    /// Statuses reachable from `self` through [`Self::can_transition_to`].
    #[must_use]
    pub fn next_statuses(self) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|to| self.can_transition_to(*to))
            .collect()
    }

    /// The wire name of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Processing => "PROCESSING",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("invalid order status: {s}"))
    }
}

/// Payment status embedded in an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Paid => write!(f, "PAID"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// How the customer intends to pay.
///
/// New providers are added as variants; callers must not assume the set is
/// closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_method", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum PaymentMethod {
    /// Hosted card checkout with the card provider.
    CardProvider,
    /// Paid to the courier on delivery.
    CashOnDelivery,
    /// Bank or wallet transfer confirmed by staff.
    GenericOnline,
}

impl PaymentMethod {
    /// Whether payment goes through a hosted checkout session.
    #[must_use]
    pub const fn uses_checkout_session(self) -> bool {
        matches!(self, Self::CardProvider)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CardProvider => write!(f, "CARD_PROVIDER"),
            Self::CashOnDelivery => write!(f, "CASH_ON_DELIVERY"),
            Self::GenericOnline => write!(f, "GENERIC_ONLINE"),
        }
    }
}

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "account_role", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A shopper.
    #[default]
    User,
    /// Store staff with access to the admin console.
    Admin,
}

impl Role {
    /// Whether this role grants everything `required` grants.
    #[must_use]
    pub const fn satisfies(self, required: Self) -> bool {
        matches!((self, required), (Self::Admin, _) | (Self::User, Self::User))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("invalid role: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_moves_may_skip() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Delivered));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Shipped));
    }

    #[test]
    fn test_backward_and_same_moves_rejected() {
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Confirmed.can_transition_to(OrderStatus::Confirmed));
    }

    #[test]
    fn test_cancel_only_early() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_terminal_statuses_are_frozen() {
        for to in OrderStatus::ALL {
            assert!(!OrderStatus::Delivered.can_transition_to(to));
            assert!(!OrderStatus::Cancelled.can_transition_to(to));
        }
        assert!(OrderStatus::Delivered.next_statuses().is_empty());
    }

    #[test]
    fn test_next_statuses_from_pending() {
        assert_eq!(
            OrderStatus::Pending.next_statuses(),
            vec![
                OrderStatus::Confirmed,
                OrderStatus::Processing,
                OrderStatus::Shipped,
                OrderStatus::Delivered,
                OrderStatus::Cancelled,
            ]
        );
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentMethod::CashOnDelivery).unwrap(),
            "\"CASH_ON_DELIVERY\""
        );
        assert_eq!(serde_json::to_string(&PaymentStatus::Paid).unwrap(), "\"PAID\"");
        assert_eq!("shipped".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
        assert!("LOST".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_role_satisfies() {
        assert!(Role::Admin.satisfies(Role::User));
        assert!(Role::Admin.satisfies(Role::Admin));
        assert!(Role::User.satisfies(Role::User));
        assert!(!Role::User.satisfies(Role::Admin));
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
    }
}
