//! Order placement and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{OrderId, OrderStatus};
use fulfillment::{OrderIntake, OrderPlacement, PlaceOrder, PlacementPath, ReservationClient};
use ledger::{Order, OrderLedger};
use queue::Broker;
use serde::Deserialize;

use crate::error::ApiError;

/// Shared order-service state accessible from all handlers.
pub type OrderState<O, R, B> = Arc<OrderIntake<O, R, B>>;

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
}

/// POST /orders: place an order; 200 when reserved, 202 when queued.
#[tracing::instrument(skip(intake, payload))]
pub async fn create<O, R, B>(
    State(intake): State<OrderState<O, R, B>>,
    payload: Result<Json<PlaceOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderPlacement>), ApiError>
where
    O: OrderLedger + 'static,
    R: ReservationClient + 'static,
    B: Broker + 'static,
{
    let Json(command) = payload?;
    let placement = intake.place_order(command).await?;

    let status = match placement.path {
        PlacementPath::Synchronous => StatusCode::OK,
        PlacementPath::Queued => StatusCode::ACCEPTED,
    };
    Ok((status, Json(placement)))
}

/// GET /orders/{id}: load a single order.
#[tracing::instrument(skip(intake))]
pub async fn get<O, R, B>(
    State(intake): State<OrderState<O, R, B>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError>
where
    O: OrderLedger + 'static,
    R: ReservationClient + 'static,
    B: Broker + 'static,
{
    let order_id = parse_order_id(&id)?;
    let order = intake
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;
    Ok(Json(order))
}

/// GET /orders?status=: list orders, optionally by status.
#[tracing::instrument(skip(intake))]
pub async fn list<O, R, B>(
    State(intake): State<OrderState<O, R, B>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, ApiError>
where
    O: OrderLedger + 'static,
    R: ReservationClient + 'static,
    B: Broker + 'static,
{
    let status = query
        .status
        .as_deref()
        .map(|s| {
            OrderStatus::parse(s).ok_or_else(|| ApiError::BadRequest(format!("Unknown status: {s}")))
        })
        .transpose()?;

    Ok(Json(intake.list_orders(status).await?))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(OrderId::from_uuid(uuid))
}
