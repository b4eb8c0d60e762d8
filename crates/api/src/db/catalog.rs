//! `PostgreSQL` product lookup.
//!
//! Products are maintained by the catalog tooling; this side only reads
//! name, price and availability.

use async_trait::async_trait;

use ratna_core::{Price, ProductId};

use super::{CatalogLookup, PgStore, RepositoryError};
use crate::models::CatalogProduct;

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: ProductId,
    name: String,
    price: Price,
    is_available: bool,
}

#[async_trait]
impl CatalogLookup for PgStore {
    async fn product(&self, id: ProductId) -> Result<Option<CatalogProduct>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, price, is_available FROM product WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| CatalogProduct {
            id: r.id,
            name: r.name,
            price: r.price,
            is_available: r.is_available,
        }))
    }
}
