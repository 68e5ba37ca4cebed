use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use crate::broker::{Broker, Delivery};
use crate::memory::InMemoryBroker;
use crate::postgres::{DEFAULT_LEASE, PostgresBroker};
use crate::{QueueError, Result, sleep_or_shutdown};

/// Establishes broker connections on behalf of a [`SupervisedBroker`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Broker: Broker + 'static;

    /// Opens a fresh connection.
    async fn connect(&self) -> Result<Self::Broker>;
}

/// Connects a [`PostgresBroker`] to a database URL.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    url: String,
    lease: Duration,
    acquire_timeout: Duration,
}

impl PostgresConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            lease: DEFAULT_LEASE,
            acquire_timeout: Duration::from_secs(3),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    type Broker = PostgresBroker;

    async fn connect(&self) -> Result<PostgresBroker> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.url)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(PostgresBroker::new(pool).with_lease(self.lease))
    }
}

/// Hands out clones of an [`InMemoryBroker`], failing while it is offline.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    broker: InMemoryBroker,
    attempts: Arc<AtomicUsize>,
}

impl InMemoryConnector {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self {
            broker,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the broker that connections are made to.
    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// Returns how many times `connect` has been called.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Broker = InMemoryBroker;

    async fn connect(&self) -> Result<InMemoryBroker> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.broker.is_online() {
            return Err(QueueError::Connection("connection refused".to_string()));
        }
        Ok(self.broker.clone())
    }
}

/// Timing for the supervision loop.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Wait between failed connection attempts.
    pub reconnect_interval: Duration,
    /// Wait between health checks of a live connection.
    pub health_check_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(5),
        }
    }
}

struct Inner<C: Connector> {
    connector: C,
    config: SupervisorConfig,
    handle: RwLock<Option<Arc<C::Broker>>>,
    ever_connected: AtomicBool,
}

/// A broker connection that re-establishes itself.
///
/// The current connection is an `Arc` swapped under a lock. While no
/// connection exists every operation fails fast with
/// [`QueueError::NotReady`]. A connection-class error from any operation
/// drops the handle so the next [`SupervisedBroker::run`] iteration
/// reconnects.
pub struct SupervisedBroker<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for SupervisedBroker<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> SupervisedBroker<C> {
    pub fn new(connector: C, config: SupervisorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                handle: RwLock::new(None),
                ever_connected: AtomicBool::new(false),
            }),
        }
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.handle.read().await.is_some()
    }

    /// Establishes a connection unless one is already live.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected().await {
            return Ok(());
        }

        let broker = self.inner.connector.connect().await?;
        let mut handle = self.inner.handle.write().await;
        if handle.is_none() {
            *handle = Some(Arc::new(broker));
            if self.inner.ever_connected.swap(true, Ordering::SeqCst) {
                metrics::counter!("queue_reconnects_total").increment(1);
                info!("Broker connection re-established");
            } else {
                info!("Broker connection established");
            }
        }
        Ok(())
    }

    /// Keeps the connection alive until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let delay = if self.tick().await {
                self.inner.config.health_check_interval
            } else {
                self.inner.config.reconnect_interval
            };
            if sleep_or_shutdown(&mut shutdown, delay).await {
                break;
            }
        }
        debug!("Broker supervisor stopped");
    }

    /// Runs one supervision step; returns whether a healthy connection exists.
    async fn tick(&self) -> bool {
        let current = self.inner.handle.read().await.clone();
        match current {
            Some(broker) => match broker.health_check().await {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "Broker health check failed");
                    self.invalidate(&broker).await;
                    false
                }
            },
            None => match self.connect().await {
                Ok(()) => true,
                Err(err) => {
                    warn!(
                        error = %err,
                        retry_in = ?self.inner.config.reconnect_interval,
                        "Broker connection attempt failed"
                    );
                    false
                }
            },
        }
    }

    async fn current(&self) -> Result<Arc<C::Broker>> {
        self.inner
            .handle
            .read()
            .await
            .clone()
            .ok_or(QueueError::NotReady)
    }

    async fn invalidate(&self, broken: &Arc<C::Broker>) {
        let mut handle = self.inner.handle.write().await;
        if handle.as_ref().is_some_and(|h| Arc::ptr_eq(h, broken)) {
            *handle = None;
            warn!("Broker connection dropped");
        }
    }

    async fn observe<T>(&self, broker: &Arc<C::Broker>, result: Result<T>) -> Result<T> {
        if let Err(err) = &result
            && err.is_connection_failure()
        {
            self.invalidate(broker).await;
        }
        result
    }
}

#[async_trait]
impl<C: Connector> Broker for SupervisedBroker<C> {
    async fn publish(&self, queue: &str, payload: serde_json::Value) -> Result<()> {
        let broker = self.current().await?;
        let result = broker.publish(queue, payload).await;
        self.observe(&broker, result).await
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>> {
        let broker = self.current().await?;
        let result = broker.fetch(queue).await;
        self.observe(&broker, result).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let broker = self.current().await?;
        let result = broker.ack(delivery).await;
        self.observe(&broker, result).await
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        let broker = self.current().await?;
        let result = broker.nack(delivery, requeue).await;
        self.observe(&broker, result).await
    }

    async fn health_check(&self) -> Result<()> {
        let broker = self.current().await?;
        let result = broker.health_check().await;
        self.observe(&broker, result).await
    }
}
