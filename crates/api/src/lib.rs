//! HTTP services for dual-path order fulfillment.
//!
//! The order service accepts orders and consumes completion notifications;
//! the inventory service owns stock and consumes queued reservations. Both
//! expose structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use fulfillment::{ChaosInjector, ReservationClient};
use ledger::{InventoryLedger, OrderLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use queue::Broker;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::inventory::InventoryState;
use routes::orders::OrderState;

/// Creates the order-service router.
pub fn create_order_app<O, R, B>(state: OrderState<O, R, B>, metrics_handle: PrometheusHandle) -> Router
where
    O: OrderLedger + 'static,
    R: ReservationClient + 'static,
    B: Broker + 'static,
{
    let orders = Router::new()
        .route(
            "/orders",
            post(routes::orders::create::<O, R, B>).get(routes::orders::list::<O, R, B>),
        )
        .route("/orders/{id}", get(routes::orders::get::<O, R, B>))
        .with_state(state);

    finish(orders, "order-service", metrics_handle)
}

/// Creates the inventory-service router. Only the decrement route is
/// subject to chaos delays.
pub fn create_inventory_app<L>(
    state: InventoryState<L>,
    chaos: ChaosInjector,
    metrics_handle: PrometheusHandle,
) -> Router
where
    L: InventoryLedger + 'static,
{
    let decrement = Router::new()
        .route("/inventory/decrement", post(routes::inventory::decrement::<L>))
        .layer(middleware::from_fn_with_state(
            Arc::new(chaos),
            routes::inventory::inject_chaos,
        ))
        .with_state(state.clone());

    let inventory = Router::new()
        .route("/inventory/restock", post(routes::inventory::restock::<L>))
        .route("/inventory/{product_id}", get(routes::inventory::get::<L>))
        .with_state(state)
        .merge(decrement);

    finish(inventory, "inventory-service", metrics_handle)
}

fn finish(app: Router, service: &'static str, metrics_handle: PrometheusHandle) -> Router {
    app.merge(routes::health::router(service))
        .merge(routes::metrics::router(metrics_handle))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
