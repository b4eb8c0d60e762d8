//! Admin console endpoints. Every handler requires an admin session.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::instrument;

use ratna_core::{OrderStatus, PaymentStatus, ShippingRateId};

use super::orders::order_number;
use crate::db::ActivityLog;
use crate::error::{AppError, Result};
use crate::middleware::RequireAdmin;
use crate::models::{ActivityEntry, NewShippingRate, OrderView, ShippingRate};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct OrderFilter {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub status: PaymentStatus,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

fn limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// `GET /api/admin/orders?status=&limit=`
pub async fn orders(
    State(state): State<AppState>,
    RequireAdmin(_): RequireAdmin,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<Vec<OrderView>>> {
    let status = filter
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;
    let orders = state.orders().list(status, limit(filter.limit)).await?;
    Ok(Json(orders.into_iter().map(OrderView::from).collect()))
}

/// `PUT /api/admin/orders/{number}/status`
#[instrument(skip(state, admin), fields(admin_id = %admin.account_id))]
pub async fn set_order_status(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(number): Path<String>,
    Json(form): Json<StatusRequest>,
) -> Result<Json<OrderView>> {
    let number = order_number(&number)?;
    let order = state
        .orders()
        .transition_status(&number, form.status)
        .await?;
    Ok(Json(order.into()))
}

/// `PUT /api/admin/orders/{number}/payment`
#[instrument(skip(state, admin, form), fields(admin_id = %admin.account_id, status = %form.status))]
pub async fn set_payment_status(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(number): Path<String>,
    Json(form): Json<PaymentRequest>,
) -> Result<Json<OrderView>> {
    let number = order_number(&number)?;
    let transaction_id = form
        .transaction_id
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty());
    let order = state
        .payments()
        .set_status_direct(&number, form.status, transaction_id)
        .await?;
    Ok(Json(order.into()))
}

/// `GET /api/admin/activity?limit=`
pub async fn activity(
    State(state): State<AppState>,
    RequireAdmin(_): RequireAdmin,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<ActivityEntry>>> {
    let entries = state.store().recent_activity(limit(query.limit)).await?;
    Ok(Json(entries))
}

/// `POST /api/admin/shipping-rates`
pub async fn create_shipping_rate(
    State(state): State<AppState>,
    RequireAdmin(_): RequireAdmin,
    Json(form): Json<NewShippingRate>,
) -> Result<(StatusCode, Json<ShippingRate>)> {
    let rate = state.shipping_rates().create(&form).await?;
    Ok((StatusCode::CREATED, Json(rate)))
}

/// `PUT /api/admin/shipping-rates/{id}`
pub async fn update_shipping_rate(
    State(state): State<AppState>,
    RequireAdmin(_): RequireAdmin,
    Path(id): Path<ShippingRateId>,
    Json(form): Json<NewShippingRate>,
) -> Result<Json<ShippingRate>> {
    let rate = state.shipping_rates().update(id, &form).await?;
    Ok(Json(rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_clamped() {
        assert_eq!(limit(None), DEFAULT_LIMIT);
        assert_eq!(limit(Some(0)), 1);
        assert_eq!(limit(Some(10_000)), MAX_LIMIT);
    }
}
