//! Cart and catalog lookup types.

use serde::Serialize;

use ratna_core::{Price, ProductId};

/// One line of a customer's cart.
///
/// No price is kept here; the price is read from the catalog when the order
/// is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// What order creation needs to know about a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogProduct {
    pub id: ProductId,
    pub name: String,
    pub price: Price,
    pub is_available: bool,
}
