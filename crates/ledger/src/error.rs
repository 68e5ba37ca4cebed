use common::OrderId;
use thiserror::Error;

/// Errors that can occur when reading or mutating a ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The backing store cannot be reached.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// A stored row holds a value the domain types cannot represent.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Returns true for failures that may succeed when retried unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Unavailable(_) => true,
            LedgerError::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                // serialization_failure, deadlock_detected
                sqlx::Error::Database(db_err) => {
                    matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
