//! Fulfillment error types.

use common::ProductId;
use ledger::LedgerError;
use queue::QueueError;
use thiserror::Error;

/// Errors that can occur while placing orders or moving stock.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The request is malformed and will never succeed as sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Not enough stock to satisfy the reservation.
    #[error("Insufficient stock for {product_id}: requested {requested}")]
    InsufficientStock { product_id: ProductId, requested: u32 },

    /// Neither the synchronous path nor the queue could take the order.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A store or broker was briefly unreachable; retrying may succeed.
    #[error("Transient infrastructure failure: {0}")]
    TransientInfrastructure(String),

    /// Ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Queue error.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl FulfillmentError {
    /// Wraps a ledger error, classifying connectivity problems as transient.
    pub(crate) fn from_ledger(err: LedgerError) -> Self {
        if err.is_transient() {
            FulfillmentError::TransientInfrastructure(err.to_string())
        } else {
            FulfillmentError::Ledger(err)
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
