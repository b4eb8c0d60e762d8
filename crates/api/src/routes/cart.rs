//! Cart and shipping rate endpoints.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;

use ratna_core::ProductId;

use crate::error::Result;
use crate::middleware::RequireAccount;
use crate::models::ShippingRate;
use crate::services::orders::CartView;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetLineRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// `GET /api/cart`
pub async fn show(
    State(state): State<AppState>,
    RequireAccount(session): RequireAccount,
) -> Result<Json<CartView>> {
    Ok(Json(state.cart().view(session.account_id).await?))
}

/// `POST /api/cart/items`
pub async fn set_line(
    State(state): State<AppState>,
    RequireAccount(session): RequireAccount,
    Json(form): Json<SetLineRequest>,
) -> Result<Json<CartView>> {
    let cart = state
        .cart()
        .set_quantity(session.account_id, form.product_id, form.quantity)
        .await?;
    Ok(Json(cart))
}

/// `DELETE /api/cart/items/{product_id}`
pub async fn remove_line(
    State(state): State<AppState>,
    RequireAccount(session): RequireAccount,
    Path(product_id): Path<ProductId>,
) -> Result<Json<CartView>> {
    let cart = state.cart().remove(session.account_id, product_id).await?;
    Ok(Json(cart))
}

/// `GET /api/shipping-rates`
pub async fn shipping_rates(State(state): State<AppState>) -> Result<Json<Vec<ShippingRate>>> {
    Ok(Json(state.shipping_rates().active().await?))
}
