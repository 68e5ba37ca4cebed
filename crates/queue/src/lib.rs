//! Durable at-least-once message queue.
//!
//! A [`Broker`] publishes with confirmation and hands out deliveries that must
//! be acknowledged. [`SupervisedBroker`] keeps a broker connection alive and
//! [`QueueConsumer`] runs the receive loop for a [`MessageHandler`].

pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod supervisor;

use std::time::Duration;

use tokio::sync::watch;

pub use broker::{Broker, BrokerExt, DEAD_LETTER_SUFFIX, Delivery, dead_letter_queue};
pub use consumer::{ConsumerConfig, Disposition, MessageHandler, QueueConsumer};
pub use error::{QueueError, Result};
pub use memory::InMemoryBroker;
pub use postgres::{DEFAULT_LEASE, PostgresBroker};
pub use supervisor::{
    Connector, InMemoryConnector, PostgresConnector, SupervisedBroker, SupervisorConfig,
};

/// Sleeps for `delay` unless shutdown is signalled first.
///
/// Returns `true` when the caller should stop. A dropped sender counts as
/// shutdown.
pub(crate) async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = tokio::time::sleep(delay) => false,
    }
}
