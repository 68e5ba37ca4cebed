//! Queue message schemas shared by the order and inventory services.

use serde::{Deserialize, Serialize};

use crate::{OrderId, OrderStatus, ProductId, RequestId};

/// Queue carrying reservation requests from the order service.
pub const RESERVATION_QUEUE: &str = "inventory_updates";

/// Queue carrying completion notifications back to the order service.
pub const NOTIFICATION_QUEUE: &str = "order_notifications";

/// A request to reserve stock, published when the synchronous path fails.
///
/// May be delivered more than once; `request_id` makes re-application safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationMessage {
    pub product_id: ProductId,
    pub quantity: u32,
    pub request_id: RequestId,
    pub order_id: OrderId,
}

/// Outcome of a reservation, published by the inventory consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionNotification {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub message: String,
}

impl CompletionNotification {
    pub fn completed(order_id: OrderId) -> Self {
        Self {
            order_id,
            status: OrderStatus::Completed,
            message: "Inventory reserved".to_string(),
        }
    }

    pub fn reconciliation_needed(order_id: OrderId) -> Self {
        Self {
            order_id,
            status: OrderStatus::ReconciliationNeeded,
            message: "Insufficient stock".to_string(),
        }
    }
}
