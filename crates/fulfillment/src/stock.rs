//! Inventory-side operations behind the inventory service's HTTP routes.

use common::{ProductId, RequestId};
use ledger::{
    InventoryItem, InventoryLedger, Reservation, ReservationOutcome, SettledOutcome,
    ShortfallPolicy,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{FulfillmentError, Result};

/// A synchronous decrement request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecrementStock {
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Checks a product/quantity pair coming from outside.
pub(crate) fn validate_line(product_id: &str, quantity: i64) -> Result<(ProductId, u32)> {
    let product_id = product_id.trim();
    if product_id.is_empty() {
        return Err(FulfillmentError::InvalidRequest(
            "productId must not be empty".to_string(),
        ));
    }
    let quantity = u32::try_from(quantity)
        .ok()
        .filter(|q| *q > 0)
        .ok_or_else(|| {
            FulfillmentError::InvalidRequest("quantity must be a positive integer".to_string())
        })?;
    Ok((ProductId::new(product_id), quantity))
}

/// Uses `request_id` when present and non-blank, otherwise generates one.
pub(crate) fn request_id_or_generate(request_id: Option<String>) -> RequestId {
    request_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(RequestId::new)
        .unwrap_or_else(RequestId::generate)
}

/// Stock operations over an [`InventoryLedger`].
///
/// Decrements are dedup-guarded like queued reservations, but a shortfall
/// rolls the marker back so the same request ID can still succeed on the
/// queue path.
#[derive(Debug, Clone)]
pub struct StockService<L> {
    ledger: L,
}

impl<L: InventoryLedger> StockService<L> {
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Takes stock for a synchronous reservation; returns the remaining quantity.
    #[tracing::instrument(skip(self), fields(product_id = %request.product_id, quantity = request.quantity))]
    pub async fn decrement(&self, request: DecrementStock) -> Result<i64> {
        let (product_id, quantity) = validate_line(&request.product_id, request.quantity)?;
        let request_id = request_id_or_generate(request.request_id);
        let reservation = Reservation::new(request_id, product_id.clone(), quantity);

        let outcome = self
            .ledger
            .reserve(&reservation, ShortfallPolicy::Rollback)
            .await?;

        match outcome {
            ReservationOutcome::Applied { remaining } => {
                info!(remaining, "Stock decremented");
                Ok(remaining)
            }
            ReservationOutcome::AlreadyProcessed(SettledOutcome::Applied) => {
                info!(request_id = %reservation.request_id, "Decrement already applied");
                let remaining = self
                    .ledger
                    .get_item(&product_id)
                    .await?
                    .map_or(0, |item| item.quantity);
                Ok(remaining)
            }
            ReservationOutcome::Mismatched => {
                warn!(request_id = %reservation.request_id, "Request ID reused for a different decrement");
                Err(FulfillmentError::InvalidRequest(format!(
                    "requestId {} was already used for a different reservation",
                    reservation.request_id
                )))
            }
            ReservationOutcome::InsufficientStock
            | ReservationOutcome::AlreadyProcessed(SettledOutcome::InsufficientStock) => {
                warn!("Insufficient stock for decrement");
                Err(FulfillmentError::InsufficientStock {
                    product_id,
                    requested: quantity,
                })
            }
        }
    }

    /// Adds stock, creating the product if needed.
    #[tracing::instrument(skip(self))]
    pub async fn restock(&self, product_id: &str, quantity: i64) -> Result<InventoryItem> {
        let (product_id, quantity) = validate_line(product_id, quantity).map_err(|_| {
            FulfillmentError::InvalidRequest("Invalid product or quantity".to_string())
        })?;
        let item = self.ledger.restock(&product_id, quantity).await?;
        info!(quantity = item.quantity, "Stock updated");
        Ok(item)
    }

    pub async fn get_item(&self, product_id: &str) -> Result<Option<InventoryItem>> {
        Ok(self.ledger.get_item(&ProductId::new(product_id)).await?)
    }
}
