//! Customer order endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::instrument;

use ratna_core::OrderNumber;

use crate::error::{AppError, Result, add_breadcrumb};
use crate::middleware::RequireAccount;
use crate::models::OrderView;
use crate::services::orders::PlaceOrder;
use crate::services::payments::{CheckoutSession, PaymentError};
use crate::state::AppState;

/// Parse an order number from the path.
pub(super) fn order_number(raw: &str) -> Result<OrderNumber> {
    OrderNumber::parse(raw).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// `POST /api/orders`
#[instrument(skip(state, session, form), fields(account_id = %session.account_id))]
pub async fn create(
    State(state): State<AppState>,
    RequireAccount(session): RequireAccount,
    Json(form): Json<PlaceOrder>,
) -> Result<(StatusCode, Json<OrderView>)> {
    let order = state.orders().create(session.account_id, form).await?;
    add_breadcrumb(
        "order",
        "Order placed",
        Some(&[("order_number", order.order_number.as_str())]),
    );
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// `GET /api/orders`
pub async fn index(
    State(state): State<AppState>,
    RequireAccount(session): RequireAccount,
) -> Result<Json<Vec<OrderView>>> {
    let orders = state.orders().orders_of(session.account_id).await?;
    Ok(Json(orders.into_iter().map(OrderView::from).collect()))
}

/// `GET /api/orders/{number}`
pub async fn show(
    State(state): State<AppState>,
    RequireAccount(session): RequireAccount,
    Path(number): Path<String>,
) -> Result<Json<OrderView>> {
    let number = order_number(&number)?;
    let order = state.orders().order_for(&number, &session).await?;
    Ok(Json(order.into()))
}

/// `POST /api/orders/{number}/cancel`
#[instrument(skip(state, session), fields(account_id = %session.account_id))]
pub async fn cancel(
    State(state): State<AppState>,
    RequireAccount(session): RequireAccount,
    Path(number): Path<String>,
) -> Result<Json<OrderView>> {
    let number = order_number(&number)?;
    let order = state
        .orders()
        .cancel_by_owner(&number, session.account_id)
        .await?;
    Ok(Json(order.into()))
}

/// `POST /api/orders/{number}/checkout`
#[instrument(skip(state, session), fields(account_id = %session.account_id))]
pub async fn checkout(
    State(state): State<AppState>,
    RequireAccount(session): RequireAccount,
    Path(number): Path<String>,
) -> Result<Json<CheckoutSession>> {
    let number = order_number(&number)?;
    let gateway = state.gateway().ok_or(PaymentError::Unavailable)?;
    let checkout = state
        .payments()
        .start_checkout(gateway, &number, session.account_id, state.base_url())
        .await?;
    Ok(Json(checkout))
}
