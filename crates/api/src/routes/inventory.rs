//! Stock endpoints of the inventory service.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use fulfillment::{ChaosInjector, DecrementStock, StockService};
use ledger::{InventoryItem, InventoryLedger};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared inventory-service state accessible from all handlers.
pub type InventoryState<L> = Arc<StockService<L>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestockRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct DecrementResponse {
    pub status: &'static str,
    pub stock: i64,
}

#[derive(Debug, Serialize)]
pub struct RestockResponse {
    pub message: &'static str,
    pub item: InventoryItem,
}

/// POST /inventory/decrement: take stock for a synchronous reservation.
#[tracing::instrument(skip(stock, payload))]
pub async fn decrement<L: InventoryLedger + 'static>(
    State(stock): State<InventoryState<L>>,
    payload: Result<Json<DecrementStock>, JsonRejection>,
) -> Result<Json<DecrementResponse>, ApiError> {
    let Json(request) = payload?;
    let remaining = stock.decrement(request).await?;
    Ok(Json(DecrementResponse {
        status: "success",
        stock: remaining,
    }))
}

/// POST /inventory/restock: add stock, creating the product if needed.
#[tracing::instrument(skip(stock, payload))]
pub async fn restock<L: InventoryLedger + 'static>(
    State(stock): State<InventoryState<L>>,
    payload: Result<Json<RestockRequest>, JsonRejection>,
) -> Result<Json<RestockResponse>, ApiError> {
    let Json(request) = payload
        .map_err(|_| ApiError::BadRequest("Invalid product or quantity".to_string()))?;
    let item = stock.restock(&request.product_id, request.quantity).await?;
    Ok(Json(RestockResponse {
        message: "Stock updated successfully",
        item,
    }))
}

/// GET /inventory/{productId}: current stock of one product.
#[tracing::instrument(skip(stock))]
pub async fn get<L: InventoryLedger + 'static>(
    State(stock): State<InventoryState<L>>,
    Path(product_id): Path<String>,
) -> Result<Json<InventoryItem>, ApiError> {
    let item = stock
        .get_item(&product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product {product_id} not found")))?;
    Ok(Json(item))
}

/// Middleware delaying requests according to the injector's configuration.
pub async fn inject_chaos(
    State(chaos): State<Arc<ChaosInjector>>,
    request: Request,
    next: Next,
) -> Response {
    chaos.wrap(next.run(request)).await
}
