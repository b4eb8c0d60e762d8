//! `PostgreSQL` order storage.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use ratna_core::{
    AccountId, OrderId, OrderNumber, OrderStatus, PaymentMethod, PaymentStatus, Price, ProductId,
    ShippingRateId,
};

use super::{OrderStore, PgStore, RepositoryError, quantity_from_db, quantity_to_db};
use crate::models::{
    NewOrder, Order, OrderItem, PaymentRecord, PaymentUpdate, ShippingAddress,
};

const ORDER_COLUMNS: &str = "id, order_number, account_id, shipping_rate_id, shipping_method, \
     shipping_address, payment_method, payment_status, transaction_id, subtotal, shipping_cost, \
     status, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    order_number: String,
    account_id: AccountId,
    shipping_rate_id: ShippingRateId,
    shipping_method: String,
    shipping_address: Json<ShippingAddress>,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    transaction_id: Option<String>,
    subtotal: Price,
    shipping_cost: Price,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: OrderId,
    product_id: ProductId,
    name: String,
    quantity: i32,
    unit_price: Price,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, RepositoryError> {
        let order_number = OrderNumber::parse(&self.order_number).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid order number in database: {e}"))
        })?;

        Ok(Order {
            id: self.id,
            order_number,
            account_id: self.account_id,
            items,
            shipping_rate_id: self.shipping_rate_id,
            shipping_method: self.shipping_method,
            shipping_address: self.shipping_address.0,
            payment: PaymentRecord {
                method: self.payment_method,
                status: self.payment_status,
                transaction_id: self.transaction_id,
            },
            subtotal: self.subtotal,
            shipping_cost: self.shipping_cost,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl PgStore {
    /// Attach line items to a batch of order rows, preserving row order.
    async fn hydrate(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>, RepositoryError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.id.as_i64()).collect();
        let item_rows = sqlx::query_as::<_, OrderItemRow>(
            r"
            SELECT order_id, product_id, name, quantity, unit_price
            FROM order_item
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            ",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<OrderId, Vec<OrderItem>> = HashMap::new();
        for r in item_rows {
            items.entry(r.order_id).or_default().push(OrderItem {
                product_id: r.product_id,
                name: r.name,
                quantity: quantity_from_db(r.quantity)?,
                unit_price: r.unit_price,
            });
        }

        rows.into_iter()
            .map(|row| {
                let lines = items.remove(&row.id).unwrap_or_default();
                row.into_order(lines)
            })
            .collect()
    }

    async fn hydrate_one(&self, row: Option<OrderRow>) -> Result<Option<Order>, RepositoryError> {
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.into_iter().next()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn create_order_from_cart(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO orders (order_number, account_id, shipping_rate_id, shipping_method, \
                 shipping_address, payment_method, subtotal, shipping_cost, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(&order.order_number)
            .bind(order.account_id)
            .bind(order.shipping_rate_id)
            .bind(&order.shipping_method)
            .bind(Json(&order.shipping_address))
            .bind(order.payment_method)
            .bind(order.subtotal)
            .bind(order.shipping_cost)
            .bind(order.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| RepositoryError::from_unique(e, "order number"))?;

        for (position, item) in order.items.iter().enumerate() {
            let position = i32::try_from(position).map_err(|_| {
                RepositoryError::DataCorruption("too many order lines".to_owned())
            })?;
            sqlx::query(
                r"
                INSERT INTO order_item (order_id, position, product_id, name, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(row.id)
            .bind(position)
            .bind(item.product_id)
            .bind(&item.name)
            .bind(quantity_to_db(item.quantity)?)
            .bind(item.unit_price)
            .execute(&mut *tx)
            .await?;
        }

        // Only lines still matching what was priced; anything changed since
        // stays in the cart.
        for item in &order.items {
            sqlx::query(
                "DELETE FROM cart_item WHERE account_id = $1 AND product_id = $2 AND quantity = $3",
            )
            .bind(order.account_id)
            .bind(item.product_id)
            .bind(quantity_to_db(item.quantity)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        row.into_order(order.items)
    }

    async fn order_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate_one(row).await
    }

    async fn order_by_number(
        &self,
        number: &OrderNumber,
    ) -> Result<Option<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate_one(row).await
    }

    async fn orders_for_account(&self, account: AccountId) -> Result<Vec<Order>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE account_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(account)
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
    ) -> Result<Vec<Order>, RepositoryError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE ($1::order_status IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE orders SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn apply_payment(
        &self,
        id: OrderId,
        update: PaymentUpdate,
    ) -> Result<Option<Order>, RepositoryError> {
        let sql = format!(
            "UPDATE orders \
             SET payment_status = $2, \
                 transaction_id = COALESCE($3, transaction_id), \
                 status = CASE WHEN $4 AND status = 'PENDING' THEN 'CONFIRMED'::order_status \
                               ELSE status END, \
                 updated_at = $5 \
             WHERE id = $1 \
             RETURNING {ORDER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .bind(update.status)
            .bind(&update.transaction_id)
            .bind(update.confirm_if_pending)
            .bind(update.at)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate_one(row).await
    }
}
