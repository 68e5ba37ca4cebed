use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OrderStatus, ProductId, RequestId};
use serde::{Deserialize, Serialize};

use crate::Result;

/// An order as stored by the order service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub request_id: RequestId,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to persist a new order. Orders always start out `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub request_id: RequestId,
}

impl NewOrder {
    /// Creates a new order with a freshly generated ID.
    pub fn new(product_id: ProductId, quantity: u32, request_id: RequestId) -> Self {
        Self {
            id: OrderId::new(),
            product_id,
            quantity,
            request_id,
        }
    }
}

/// Result of creating an order keyed by its request ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCreation {
    /// No order carried the request ID; a new `Pending` order was stored.
    Created(Order),
    /// An order with the same request ID already exists and was left unchanged.
    Existing(Order),
}

impl OrderCreation {
    pub fn order(&self) -> &Order {
        match self {
            OrderCreation::Created(order) | OrderCreation::Existing(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            OrderCreation::Created(order) | OrderCreation::Existing(order) => order,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, OrderCreation::Created(_))
    }
}

/// Result of a guarded status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// The transition was legal and has been stored.
    Applied(Order),
    /// The current status does not allow the transition; the order is unchanged.
    Skipped(Order),
}

impl StatusChange {
    pub fn order(&self) -> &Order {
        match self {
            StatusChange::Applied(order) | StatusChange::Skipped(order) => order,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, StatusChange::Applied(_))
    }
}

/// Durable store of orders owned by the order service.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Persists a new order with status `Pending`.
    ///
    /// The request ID is the order's idempotency key: if an order with the
    /// same request ID exists it is returned as [`OrderCreation::Existing`]
    /// and nothing is written.
    async fn create_order(&self, order: NewOrder) -> Result<OrderCreation>;

    /// Loads an order by ID.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Moves an order to `next` if its current status allows it.
    ///
    /// Illegal transitions are reported as [`StatusChange::Skipped`], not as
    /// errors. Fails with `OrderNotFound` if the order does not exist.
    async fn transition(&self, order_id: OrderId, next: OrderStatus) -> Result<StatusChange>;

    /// Lists orders, optionally filtered by status, oldest first.
    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>>;

    /// Verifies the backing store is reachable.
    async fn health_check(&self) -> Result<()>;
}
