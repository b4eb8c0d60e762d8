//! Cart management.

use serde::Serialize;
use tracing::instrument;

use ratna_core::{AccountId, Clock, Price, ProductId};

use super::OrderError;
use crate::db::{CartStore, CatalogLookup};
use crate::models::CartLine;

/// A cart line priced at the current catalog price.
#[derive(Debug, Clone, Serialize)]
pub struct CartEntry {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Price,
    pub quantity: u32,
    pub line_total: Price,
    pub is_available: bool,
}

/// The account's cart as shown to the customer.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub items: Vec<CartEntry>,
    /// Sum of the available lines.
    pub subtotal: Price,
}

pub struct CartService<'a, S: ?Sized> {
    store: &'a S,
    clock: &'a dyn Clock,
}

impl<'a, S> CartService<'a, S>
where
    S: CartStore + CatalogLookup + ?Sized,
{
    #[must_use]
    pub const fn new(store: &'a S, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Current cart with live prices. Lines whose product was removed from
    /// the catalog are skipped.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` on storage failure.
    pub async fn view(&self, account: AccountId) -> Result<CartView, OrderError> {
        let mut items = Vec::new();
        for line in self.store.cart_lines(account).await? {
            let Some(product) = self.store.product(line.product_id).await? else {
                tracing::debug!(product_id = %line.product_id, "Cart line for missing product");
                continue;
            };
            items.push(CartEntry {
                product_id: product.id,
                line_total: product.price.times(line.quantity),
                name: product.name,
                unit_price: product.price,
                quantity: line.quantity,
                is_available: product.is_available,
            });
        }
        let subtotal = items
            .iter()
            .filter(|entry| entry.is_available)
            .map(|entry| entry.line_total)
            .sum();
        Ok(CartView { items, subtotal })
    }

    /// Set the quantity of `product` in the cart, adding the line if needed.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Validation` for a zero quantity or an
    /// unavailable product and `OrderError::NotFound` for an unknown one.
    #[instrument(skip(self), fields(account_id = %account, product_id = %product))]
    pub async fn set_quantity(
        &self,
        account: AccountId,
        product: ProductId,
        quantity: u32,
    ) -> Result<CartView, OrderError> {
        if quantity == 0 {
            return Err(OrderError::Validation(
                "quantity must be at least 1".to_owned(),
            ));
        }
        let found = self
            .store
            .product(product)
            .await?
            .ok_or(OrderError::NotFound)?;
        if !found.is_available {
            return Err(OrderError::Validation(format!(
                "{} is not available",
                found.name
            )));
        }

        self.store
            .upsert_cart_line(
                account,
                CartLine {
                    product_id: product,
                    quantity,
                },
                self.clock.now(),
            )
            .await?;
        self.view(account).await
    }

    /// Remove `product` from the cart.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if it was not in the cart.
    #[instrument(skip(self), fields(account_id = %account, product_id = %product))]
    pub async fn remove(&self, account: AccountId, product: ProductId) -> Result<CartView, OrderError> {
        if !self.store.remove_cart_line(account, product).await? {
            return Err(OrderError::NotFound);
        }
        self.view(account).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ratna_core::ManualClock;

    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn test_set_quantity_overwrites_line() {
        let store = MemoryStore::new();
        let clock = ManualClock::default();
        let ring = store
            .insert_product("Gold ring", Price::from_rupees(1200), true)
            .await;
        let cart = CartService::new(&store, &clock);
        let account = AccountId::new(1);

        cart.set_quantity(account, ring, 1).await.unwrap();
        let view = cart.set_quantity(account, ring, 3).await.unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.subtotal, Price::from_rupees(3600));
    }

    #[tokio::test]
    async fn test_rejects_zero_unknown_and_unavailable() {
        let store = MemoryStore::new();
        let clock = ManualClock::default();
        let sold_out = store
            .insert_product("Pearl necklace", Price::from_rupees(8000), false)
            .await;
        let cart = CartService::new(&store, &clock);
        let account = AccountId::new(1);

        assert!(matches!(
            cart.set_quantity(account, sold_out, 0).await,
            Err(OrderError::Validation(_))
        ));
        assert!(matches!(
            cart.set_quantity(account, sold_out, 1).await,
            Err(OrderError::Validation(_))
        ));
        assert!(matches!(
            cart.set_quantity(account, ProductId::new(404), 1).await,
            Err(OrderError::NotFound)
        ));
        assert!(matches!(
            cart.remove(account, sold_out).await,
            Err(OrderError::NotFound)
        ));
    }
}
