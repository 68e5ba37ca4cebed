use thiserror::Error;

/// Errors that can occur when talking to a message broker.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No broker connection is currently established.
    #[error("Message broker is not ready")]
    NotReady,

    /// The broker connection failed or was lost.
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// The delivery is not (or no longer) held by this consumer.
    #[error("Unknown delivery: {0}")]
    UnknownDelivery(i64),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Returns true when the error means the connection itself is unusable
    /// and should be re-established.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            QueueError::NotReady | QueueError::Connection(_) => true,
            QueueError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
