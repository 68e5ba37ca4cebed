//! Order intake: synchronous reservation first, durable queue as fallback.

use std::time::Duration;

use common::{OrderId, OrderStatus, RESERVATION_QUEUE, RequestId, ReservationMessage};
use ledger::{NewOrder, Order, OrderCreation, OrderLedger};
use queue::{Broker, BrokerExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{FulfillmentError, Result};
use crate::reservation_client::{
    ReservationAttempt, ReservationClient, ReservationRequest, SoftFailureReason, reserve_within,
};
use crate::stock::{request_id_or_generate, validate_line};

/// An incoming order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrder {
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Which path settled (or took over) the reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementPath {
    /// Reserved by the synchronous call.
    Synchronous,
    /// Handed to the reservation queue.
    Queued,
}

/// What the caller is told about a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlacement {
    pub order_id: OrderId,
    pub request_id: RequestId,
    pub status: OrderStatus,
    pub message: String,
    #[serde(skip)]
    pub path: PlacementPath,
}

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Upper bound for the synchronous reservation call.
    pub reservation_timeout: Duration,
    /// Queue that receives fallback reservations.
    pub queue: String,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            reservation_timeout: Duration::from_millis(2000),
            queue: RESERVATION_QUEUE.to_string(),
        }
    }
}

/// Accepts orders and drives them to a reserved or queued state.
///
/// Every order is persisted as `Pending` before any side effect. A
/// synchronous reservation that does not succeed within the timeout falls
/// back to publishing a [`ReservationMessage`] with the same request ID, so
/// an order is only acknowledged once one of the two paths holds it
/// durably.
///
/// The request ID identifies the order: placing the same line again with a
/// known request ID reports the existing order without touching inventory,
/// and reusing it for a different line is rejected.
pub struct OrderIntake<O, R, B> {
    orders: O,
    client: R,
    broker: B,
    config: IntakeConfig,
}

impl<O, R, B> OrderIntake<O, R, B>
where
    O: OrderLedger,
    R: ReservationClient,
    B: Broker,
{
    pub fn new(orders: O, client: R, broker: B) -> Self {
        Self {
            orders,
            client,
            broker,
            config: IntakeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: IntakeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Places an order.
    #[tracing::instrument(skip(self, command), fields(product_id = %command.product_id, quantity = command.quantity))]
    pub async fn place_order(&self, command: PlaceOrder) -> Result<OrderPlacement> {
        let (product_id, quantity) = validate_line(&command.product_id, command.quantity)?;
        let request_id = request_id_or_generate(command.request_id);

        let order = match self
            .orders
            .create_order(NewOrder::new(product_id.clone(), quantity, request_id.clone()))
            .await
            .map_err(FulfillmentError::from_ledger)?
        {
            OrderCreation::Created(order) => order,
            OrderCreation::Existing(order) => {
                if order.product_id != product_id || order.quantity != quantity {
                    warn!(order_id = %order.id, request_id = %request_id, "Request ID reused for a different order");
                    return Err(FulfillmentError::InvalidRequest(format!(
                        "requestId {request_id} was already used for a different order"
                    )));
                }
                return Ok(Self::replay(order));
            }
        };
        info!(order_id = %order.id, request_id = %request_id, "Order accepted");

        let request = ReservationRequest {
            product_id,
            quantity,
            request_id,
        };

        match reserve_within(&self.client, &request, self.config.reservation_timeout).await {
            ReservationAttempt::Reserved { remaining } => {
                self.orders
                    .transition(order.id, OrderStatus::Completed)
                    .await?;
                metrics::counter!("orders_placed_total", "path" => "sync").increment(1);
                info!(order_id = %order.id, remaining, "Order completed synchronously");
                Ok(OrderPlacement {
                    order_id: order.id,
                    request_id: order.request_id,
                    status: OrderStatus::Completed,
                    message: "Order placed successfully".to_string(),
                    path: PlacementPath::Synchronous,
                })
            }
            ReservationAttempt::SoftFailure(reason) => self.fall_back(order, reason).await,
        }
    }

    /// Reports an order placed earlier under the same request ID.
    fn replay(order: Order) -> OrderPlacement {
        let (path, message) = match order.status {
            OrderStatus::Completed => (PlacementPath::Synchronous, "Order placed successfully"),
            OrderStatus::Pending | OrderStatus::Queued => {
                (PlacementPath::Queued, "Order queued for processing")
            }
            OrderStatus::ReconciliationNeeded => {
                (PlacementPath::Queued, "Order needs reconciliation")
            }
        };
        metrics::counter!("orders_placed_total", "path" => "replay").increment(1);
        info!(order_id = %order.id, status = %order.status, "Order already placed for request ID");

        OrderPlacement {
            order_id: order.id,
            request_id: order.request_id,
            status: order.status,
            message: message.to_string(),
            path,
        }
    }

    async fn fall_back(&self, order: Order, reason: SoftFailureReason) -> Result<OrderPlacement> {
        if reason.is_business_rejection() {
            info!(order_id = %order.id, reason = %reason, "Synchronous reservation rejected, queueing");
        } else {
            warn!(order_id = %order.id, reason = %reason, "Synchronous reservation failed, queueing");
        }

        let message = ReservationMessage {
            product_id: order.product_id.clone(),
            quantity: order.quantity,
            request_id: order.request_id.clone(),
            order_id: order.id,
        };

        if let Err(err) = self.broker.publish_json(&self.config.queue, &message).await {
            error!(order_id = %order.id, error = %err, "Reservation queue unavailable");
            if let Err(err) = self
                .orders
                .transition(order.id, OrderStatus::ReconciliationNeeded)
                .await
            {
                error!(order_id = %order.id, error = %err, "Failed to flag order for reconciliation");
            }
            metrics::counter!("orders_placed_total", "path" => "rejected").increment(1);
            return Err(FulfillmentError::ServiceUnavailable(
                "Order could not be processed: inventory and queue are unavailable".to_string(),
            ));
        }

        // The message is durable from here on; a failed status update only
        // leaves the order Pending until the notification arrives.
        let status = match self.orders.transition(order.id, OrderStatus::Queued).await {
            Ok(change) => change.order().status,
            Err(err) => {
                error!(order_id = %order.id, error = %err, "Failed to mark order as queued");
                order.status
            }
        };
        metrics::counter!("orders_placed_total", "path" => "queued").increment(1);
        info!(order_id = %order.id, status = %status, "Order queued for asynchronous reservation");

        Ok(OrderPlacement {
            order_id: order.id,
            request_id: order.request_id,
            status,
            message: "Order queued for processing".to_string(),
            path: PlacementPath::Queued,
        })
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.get_order(order_id).await?)
    }

    pub async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        Ok(self.orders.list_orders(status).await?)
    }
}
