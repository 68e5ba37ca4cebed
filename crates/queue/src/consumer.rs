use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broker::{Broker, Delivery};
use crate::{QueueError, Result, sleep_or_shutdown};

/// What the consumer should do with a delivery once it has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing finished; remove the message.
    Ack,
    /// Processing failed transiently; deliver the message again.
    Requeue,
    /// The message can never be processed; park it in the dead-letter queue.
    DeadLetter,
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Requeue => "requeue",
            Disposition::DeadLetter => "dead_letter",
        }
    }
}

/// Processes decoded messages from a queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    type Message: DeserializeOwned + Send;

    async fn handle(&self, message: Self::Message, delivery: &Delivery) -> Disposition;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Wait after an empty fetch or a broker error.
    pub poll_interval: Duration,
    /// Deliveries after which a requeue becomes a dead-letter. `None` retries forever.
    pub max_deliveries: Option<u32>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            max_deliveries: None,
        }
    }
}

/// Pull-based receive loop holding at most one unacknowledged delivery.
pub struct QueueConsumer<B, H> {
    broker: B,
    handler: H,
    queue: String,
    config: ConsumerConfig,
}

impl<B: Broker, H: MessageHandler> QueueConsumer<B, H> {
    pub fn new(broker: B, handler: H, queue: impl Into<String>) -> Self {
        Self {
            broker,
            handler,
            queue: queue.into(),
            config: ConsumerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Fetches and settles a single delivery.
    ///
    /// Returns `Ok(None)` when the queue is empty.
    pub async fn poll_once(&self) -> Result<Option<Disposition>> {
        let Some(delivery) = self.broker.fetch(&self.queue).await? else {
            return Ok(None);
        };

        let disposition = match delivery.decode::<H::Message>() {
            Ok(message) => self.handler.handle(message, &delivery).await,
            Err(err) => {
                warn!(
                    queue = %self.queue,
                    delivery_id = delivery.id,
                    error = %err,
                    "Undecodable message"
                );
                Disposition::DeadLetter
            }
        };

        let disposition = match (disposition, self.config.max_deliveries) {
            (Disposition::Requeue, Some(max)) if delivery.delivery_count >= max => {
                warn!(
                    queue = %self.queue,
                    delivery_id = delivery.id,
                    deliveries = delivery.delivery_count,
                    "Redelivery limit reached, dead-lettering"
                );
                Disposition::DeadLetter
            }
            (disposition, _) => disposition,
        };

        match disposition {
            Disposition::Ack => self.broker.ack(&delivery).await?,
            Disposition::Requeue => self.broker.nack(&delivery, true).await?,
            Disposition::DeadLetter => self.broker.nack(&delivery, false).await?,
        }

        metrics::counter!(
            "queue_messages_processed_total",
            "queue" => self.queue.clone(),
            "outcome" => disposition.label()
        )
        .increment(1);
        debug!(
            queue = %self.queue,
            delivery_id = delivery.id,
            outcome = disposition.label(),
            "Delivery settled"
        );

        Ok(Some(disposition))
    }

    /// Consumes until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue, "Consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.poll_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(QueueError::NotReady) => true,
                Err(err) => {
                    warn!(queue = %self.queue, error = %err, "Consumer poll failed");
                    true
                }
            };
            if idle && sleep_or_shutdown(&mut shutdown, self.config.poll_interval).await {
                break;
            }
        }
        info!(queue = %self.queue, "Consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde::Deserialize;

    use super::*;
    use crate::memory::InMemoryBroker;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Job {
        n: u32,
    }

    #[derive(Clone)]
    struct RecordingHandler {
        seen: Arc<Mutex<Vec<(u32, u32)>>>,
        reply: Disposition,
    }

    impl RecordingHandler {
        fn replying(reply: Disposition) -> Self {
            Self {
                seen: Arc::new(Mutex::new(Vec::new())),
                reply,
            }
        }

        fn seen(&self) -> Vec<(u32, u32)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        type Message = Job;

        async fn handle(&self, message: Job, delivery: &Delivery) -> Disposition {
            self.seen
                .lock()
                .unwrap()
                .push((message.n, delivery.delivery_count));
            self.reply
        }
    }

    #[tokio::test]
    async fn test_empty_queue_returns_none() {
        let consumer = QueueConsumer::new(
            InMemoryBroker::new(),
            RecordingHandler::replying(Disposition::Ack),
            "jobs",
        );
        assert_eq!(consumer.poll_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let broker = InMemoryBroker::new();
        broker.publish("jobs", serde_json::json!({"n": 7})).await.unwrap();
        let handler = RecordingHandler::replying(Disposition::Ack);
        let consumer = QueueConsumer::new(broker.clone(), handler.clone(), "jobs");

        assert_eq!(consumer.poll_once().await.unwrap(), Some(Disposition::Ack));
        assert_eq!(handler.seen(), vec![(7, 1)]);
        assert_eq!(broker.depth("jobs").await, 0);
        assert_eq!(broker.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn test_requeue_redelivers() {
        let broker = InMemoryBroker::new();
        broker.publish("jobs", serde_json::json!({"n": 1})).await.unwrap();
        let handler = RecordingHandler::replying(Disposition::Requeue);
        let consumer = QueueConsumer::new(broker.clone(), handler.clone(), "jobs");

        consumer.poll_once().await.unwrap();
        consumer.poll_once().await.unwrap();

        assert_eq!(handler.seen(), vec![(1, 1), (1, 2)]);
        assert_eq!(broker.depth("jobs").await, 1);
    }

    #[tokio::test]
    async fn test_max_deliveries_dead_letters() {
        let broker = InMemoryBroker::new();
        broker.publish("jobs", serde_json::json!({"n": 1})).await.unwrap();
        let consumer = QueueConsumer::new(
            broker.clone(),
            RecordingHandler::replying(Disposition::Requeue),
            "jobs",
        )
        .with_config(ConsumerConfig {
            max_deliveries: Some(2),
            ..ConsumerConfig::default()
        });

        assert_eq!(consumer.poll_once().await.unwrap(), Some(Disposition::Requeue));
        assert_eq!(
            consumer.poll_once().await.unwrap(),
            Some(Disposition::DeadLetter)
        );
        assert_eq!(broker.depth("jobs").await, 0);
        assert_eq!(broker.depth("jobs.dead-letter").await, 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_dead_lettered() {
        let broker = InMemoryBroker::new();
        broker
            .publish("jobs", serde_json::json!({"unexpected": true}))
            .await
            .unwrap();
        let handler = RecordingHandler::replying(Disposition::Ack);
        let consumer = QueueConsumer::new(broker.clone(), handler.clone(), "jobs");

        assert_eq!(
            consumer.poll_once().await.unwrap(),
            Some(Disposition::DeadLetter)
        );
        assert!(handler.seen().is_empty());
        assert_eq!(broker.depth("jobs.dead-letter").await, 1);
    }

    #[tokio::test]
    async fn test_broker_error_propagates() {
        let broker = InMemoryBroker::new();
        broker.set_online(false);
        let consumer = QueueConsumer::new(
            broker,
            RecordingHandler::replying(Disposition::Ack),
            "jobs",
        );

        assert!(consumer.poll_once().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_queue_and_stops_on_shutdown() {
        let broker = InMemoryBroker::new();
        for n in 1..=3 {
            broker.publish("jobs", serde_json::json!({ "n": n })).await.unwrap();
        }
        let handler = RecordingHandler::replying(Disposition::Ack);
        let consumer = Arc::new(QueueConsumer::new(broker.clone(), handler.clone(), "jobs"));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn({
            let consumer = Arc::clone(&consumer);
            async move { consumer.run(shutdown_rx).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.seen(), vec![(1, 1), (2, 1), (3, 1)]);

        broker.publish("jobs", serde_json::json!({"n": 4})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(handler.seen().len(), 4);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(broker.depth("jobs").await, 0);
    }
}
