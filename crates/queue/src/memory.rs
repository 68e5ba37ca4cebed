use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::broker::{Broker, Delivery, dead_letter_queue};
use crate::{QueueError, Result};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: i64,
    payload: serde_json::Value,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct BrokerState {
    ready: HashMap<String, VecDeque<StoredMessage>>,
    unacked: HashMap<i64, (String, StoredMessage)>,
    next_id: i64,
}

impl BrokerState {
    /// Removes `delivery` from the unacked set if it is still the current
    /// hand-out of its message.
    fn take_unacked(&mut self, delivery: &Delivery) -> Result<(String, StoredMessage)> {
        let held = self
            .unacked
            .get(&delivery.id)
            .is_some_and(|(_, m)| m.delivery_count == delivery.delivery_count);
        if !held {
            return Err(QueueError::UnknownDelivery(delivery.id));
        }
        self.unacked
            .remove(&delivery.id)
            .ok_or(QueueError::UnknownDelivery(delivery.id))
    }
}

/// In-memory broker for testing.
///
/// Messages survive for as long as the broker value does. Unacknowledged
/// deliveries are held until `ack`/`nack`, or until
/// [`InMemoryBroker::drop_connections`] simulates a lost consumer connection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the broker becoming unreachable (or reachable again).
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Returns the number of messages waiting in `queue`.
    pub async fn depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .ready
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Returns the number of delivered but unacknowledged messages.
    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    /// Returns copies of the payloads waiting in `queue`, oldest first.
    pub async fn peek(&self, queue: &str) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .await
            .ready
            .get(queue)
            .map(|q| q.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns every unacknowledged delivery to the front of its queue, as a
    /// broker does when a consumer connection drops.
    pub async fn drop_connections(&self) {
        let mut state = self.state.lock().await;
        let mut unacked: Vec<_> = state.unacked.drain().map(|(_, v)| v).collect();
        unacked.sort_by_key(|(_, m)| std::cmp::Reverse(m.id));
        for (queue, message) in unacked {
            state.ready.entry(queue).or_default().push_front(message);
        }
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(QueueError::Connection("broker unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, queue: &str, payload: serde_json::Value) -> Result<()> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let message = StoredMessage {
            id: state.next_id,
            payload,
            delivery_count: 0,
        };
        state
            .ready
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
        Ok(())
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;
        let Some(mut message) = state.ready.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        message.delivery_count += 1;

        let delivery = Delivery {
            id: message.id,
            queue: queue.to_string(),
            payload: message.payload.clone(),
            delivery_count: message.delivery_count,
        };
        state
            .unacked
            .insert(message.id, (queue.to_string(), message));
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;
        state.take_unacked(delivery).map(|_| ())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        self.ensure_online()?;
        let mut state = self.state.lock().await;
        let (queue, message) = state.take_unacked(delivery)?;

        let target = if requeue {
            queue
        } else {
            dead_letter_queue(&queue)
        };
        state.ready.entry(target).or_default().push_back(message);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_online()
    }
}
