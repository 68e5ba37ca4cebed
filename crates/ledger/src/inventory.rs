use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ProductId, RequestId};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Stock level for a single product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

/// A request to take `quantity` units of a product, keyed by its idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub request_id: RequestId,
    pub product_id: ProductId,
    pub quantity: u32,
}

impl Reservation {
    pub fn new(request_id: RequestId, product_id: ProductId, quantity: u32) -> Self {
        Self {
            request_id,
            product_id,
            quantity,
        }
    }

    /// True if a request recorded for `product_id` and `quantity` is this one.
    pub fn matches(&self, product_id: &ProductId, quantity: u32) -> bool {
        self.product_id == *product_id && self.quantity == quantity
    }
}

/// What to do with the dedup marker when stock is insufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortfallPolicy {
    /// Keep the marker and record the shortfall as the final outcome.
    Record,
    /// Roll the marker back so a later attempt with the same key is evaluated afresh.
    Rollback,
}

/// Final outcome stored with a processed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettledOutcome {
    Applied,
    InsufficientStock,
}

impl SettledOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettledOutcome::Applied => "APPLIED",
            SettledOutcome::InsufficientStock => "INSUFFICIENT_STOCK",
        }
    }

    pub fn parse(value: &str) -> Option<SettledOutcome> {
        match value {
            "APPLIED" => Some(SettledOutcome::Applied),
            "INSUFFICIENT_STOCK" => Some(SettledOutcome::InsufficientStock),
            _ => None,
        }
    }
}

/// Result of a dedup-guarded reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// The decrement was applied for the first time.
    Applied { remaining: i64 },
    /// Not enough stock (or unknown product); nothing was decremented.
    InsufficientStock,
    /// The request ID was settled by an earlier attempt; nothing changed.
    AlreadyProcessed(SettledOutcome),
    /// The request ID was settled for a different product or quantity;
    /// nothing changed.
    Mismatched,
}

impl ReservationOutcome {
    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ReservationOutcome::Applied { .. } => "applied",
            ReservationOutcome::InsufficientStock => "insufficient_stock",
            ReservationOutcome::AlreadyProcessed(_) => "duplicate",
            ReservationOutcome::Mismatched => "mismatched",
        }
    }
}

/// Durable per-product stock plus the table of processed request IDs.
///
/// Every mutation that consumes stock goes through [`InventoryLedger::reserve`],
/// which inserts the request ID and applies the conditional decrement in one
/// transaction. Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Adds `quantity` units, creating the product if it does not exist.
    async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryItem>;

    /// Returns the current stock of a product.
    async fn get_item(&self, product_id: &ProductId) -> Result<Option<InventoryItem>>;

    /// Applies a reservation at most once per request ID.
    ///
    /// The decrement only happens when `quantity_available >= requested`, so
    /// stock never goes negative. `policy` decides whether a shortfall is
    /// recorded as final or rolled back. The marker keeps the product and
    /// quantity, and a request ID reused for a different line is reported as
    /// [`ReservationOutcome::Mismatched`].
    async fn reserve(
        &self,
        reservation: &Reservation,
        policy: ShortfallPolicy,
    ) -> Result<ReservationOutcome>;

    /// Verifies the backing store is reachable.
    async fn health_check(&self) -> Result<()>;
}
