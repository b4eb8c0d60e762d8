//! `PostgreSQL` cart storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ratna_core::{AccountId, ProductId};

use super::{CartStore, PgStore, RepositoryError, quantity_from_db, quantity_to_db};
use crate::models::CartLine;

#[async_trait]
impl CartStore for PgStore {
    async fn cart_lines(&self, account: AccountId) -> Result<Vec<CartLine>, RepositoryError> {
        let rows: Vec<(ProductId, i32)> = sqlx::query_as(
            r"
            SELECT product_id, quantity
            FROM cart_item
            WHERE account_id = $1
            ORDER BY product_id
            ",
        )
        .bind(account)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(product_id, quantity)| {
                Ok(CartLine {
                    product_id,
                    quantity: quantity_from_db(quantity)?,
                })
            })
            .collect()
    }

    async fn upsert_cart_line(
        &self,
        account: AccountId,
        line: CartLine,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO cart_item (account_id, product_id, quantity, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (account_id, product_id)
            DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(account)
        .bind(line.product_id)
        .bind(quantity_to_db(line.quantity)?)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_cart_line(
        &self,
        account: AccountId,
        product: ProductId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM cart_item WHERE account_id = $1 AND product_id = $2")
            .bind(account)
            .bind(product)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
