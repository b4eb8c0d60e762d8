//! `PostgreSQL` shipping rate storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ratna_core::{Price, ShippingRateId};

use super::{PgStore, RepositoryError, ShippingRateStore};
use crate::models::{NewShippingRate, ShippingRate};

#[derive(sqlx::FromRow)]
struct ShippingRateRow {
    id: ShippingRateId,
    name: String,
    cost: Price,
    is_active: bool,
    estimated_delivery: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ShippingRateRow> for ShippingRate {
    fn from(r: ShippingRateRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            cost: r.cost,
            is_active: r.is_active,
            estimated_delivery: r.estimated_delivery,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[async_trait]
impl ShippingRateStore for PgStore {
    async fn shipping_rate(
        &self,
        id: ShippingRateId,
    ) -> Result<Option<ShippingRate>, RepositoryError> {
        let row = sqlx::query_as::<_, ShippingRateRow>(
            r"
            SELECT id, name, cost, is_active, estimated_delivery, created_at, updated_at
            FROM shipping_rate
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn active_shipping_rates(&self) -> Result<Vec<ShippingRate>, RepositoryError> {
        let rows = sqlx::query_as::<_, ShippingRateRow>(
            r"
            SELECT id, name, cost, is_active, estimated_delivery, created_at, updated_at
            FROM shipping_rate
            WHERE is_active
            ORDER BY cost, id
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_shipping_rate(
        &self,
        rate: &NewShippingRate,
        at: DateTime<Utc>,
    ) -> Result<ShippingRate, RepositoryError> {
        let row = sqlx::query_as::<_, ShippingRateRow>(
            r"
            INSERT INTO shipping_rate (name, cost, is_active, estimated_delivery, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING id, name, cost, is_active, estimated_delivery, created_at, updated_at
            ",
        )
        .bind(rate.name.trim())
        .bind(rate.cost)
        .bind(rate.is_active)
        .bind(&rate.estimated_delivery)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "shipping rate name"))?;
        Ok(row.into())
    }

    async fn update_shipping_rate(
        &self,
        id: ShippingRateId,
        rate: &NewShippingRate,
        at: DateTime<Utc>,
    ) -> Result<ShippingRate, RepositoryError> {
        let row = sqlx::query_as::<_, ShippingRateRow>(
            r"
            UPDATE shipping_rate
            SET name = $2, cost = $3, is_active = $4, estimated_delivery = $5, updated_at = $6
            WHERE id = $1
            RETURNING id, name, cost, is_active, estimated_delivery, created_at, updated_at
            ",
        )
        .bind(id)
        .bind(rate.name.trim())
        .bind(rate.cost)
        .bind(rate.is_active)
        .bind(&rate.estimated_delivery)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "shipping rate name"))?;

        row.map(Into::into).ok_or(RepositoryError::NotFound)
    }
}
