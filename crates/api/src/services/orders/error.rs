//! Order lifecycle errors.

use thiserror::Error;

use ratna_core::{OrderNumberError, OrderStatus};

use crate::db::RepositoryError;

/// Errors from order, cart and shipping rate operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Nothing to order.
    #[error("cart is empty")]
    EmptyCart,

    /// The shipping method is unknown or inactive.
    #[error("shipping method is not available")]
    InvalidShipping,

    /// Bad input, such as a blank address field or an unavailable product.
    #[error("{0}")]
    Validation(String),

    /// Duplicate resource, such as a shipping rate name.
    #[error("{0}")]
    Conflict(String),

    #[error("not found")]
    NotFound,

    /// The status change is not allowed from the current status.
    #[error("cannot move order from {from} to {to}")]
    State { from: OrderStatus, to: OrderStatus },

    /// The order belongs to another account.
    #[error("order belongs to another account")]
    Forbidden,

    /// The configured prefix cannot form an order number.
    #[error("order numbering failed: {0}")]
    Numbering(#[from] OrderNumberError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
