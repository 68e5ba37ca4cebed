use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;

/// Suffix appended to a queue name to form its dead-letter queue.
pub const DEAD_LETTER_SUFFIX: &str = ".dead-letter";

/// Returns the dead-letter queue name for `queue`.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}{DEAD_LETTER_SUFFIX}")
}

/// A message handed to a consumer, awaiting `ack` or `nack`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker-assigned identifier, stable across redeliveries.
    pub id: i64,
    pub queue: String,
    pub payload: serde_json::Value,
    /// How many times this message has been handed out, including this time.
    pub delivery_count: u32,
}

impl Delivery {
    /// True if an earlier delivery of this message was never acknowledged.
    pub fn redelivered(&self) -> bool {
        self.delivery_count > 1
    }

    /// Decodes the JSON payload into a typed message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// A durable, at-least-once message broker.
///
/// `publish` only returns `Ok` once the broker has durably accepted the
/// message. Fetched messages stay invisible to other consumers until they are
/// acknowledged, negatively acknowledged, or their lease runs out.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes a message and waits for the broker's confirmation.
    async fn publish(&self, queue: &str, payload: serde_json::Value) -> Result<()>;

    /// Takes the next available message, if any. Does not block.
    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Marks a delivery as fully processed; it will not be delivered again.
    ///
    /// Only the latest hand-out of a message can settle it. A delivery whose
    /// message has since been redelivered fails with `UnknownDelivery` and
    /// leaves the message alone; the same holds for `nack`.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Rejects a delivery. With `requeue` it becomes available again,
    /// otherwise it is moved to the dead-letter queue.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()>;

    /// Verifies the connection is alive.
    async fn health_check(&self) -> Result<()>;
}

/// Extension trait providing typed helpers for brokers.
#[async_trait]
pub trait BrokerExt: Broker {
    /// Serializes `message` as JSON and publishes it.
    async fn publish_json<T: Serialize + Sync>(&self, queue: &str, message: &T) -> Result<()> {
        let payload = serde_json::to_value(message)?;
        self.publish(queue, payload).await
    }
}

// Blanket implementation for all Broker implementations
impl<T: Broker + ?Sized> BrokerExt for T {}
