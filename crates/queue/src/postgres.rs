use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::broker::{Broker, Delivery, dead_letter_queue};
use crate::{QueueError, Result};

/// Default time a fetched message stays invisible before it is redelivered.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// PostgreSQL-backed broker over the `queue_messages` table.
///
/// Publishing is an INSERT, so a confirmed publish is a committed row.
/// `fetch` claims the oldest visible row with `FOR UPDATE SKIP LOCKED` and
/// hides it for the lease duration; a consumer that dies without acking lets
/// the lease expire and the message is handed out again.
#[derive(Clone, Debug)]
pub struct PostgresBroker {
    pool: PgPool,
    lease: Duration,
}

impl PostgresBroker {
    /// Creates a new broker using the default lease.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: DEFAULT_LEASE,
        }
    }

    /// Sets how long a fetched message stays invisible to other consumers.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Returns the number of messages in `queue`, including leased ones.
    pub async fn depth(&self, queue: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE queue = $1")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl Broker for PostgresBroker {
    async fn publish(&self, queue: &str, payload: serde_json::Value) -> Result<()> {
        sqlx::query("INSERT INTO queue_messages (queue, payload) VALUES ($1, $2)")
            .bind(queue)
            .bind(&payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>> {
        let row = sqlx::query(
            r#"
            UPDATE queue_messages
            SET delivery_count = delivery_count + 1,
                locked_until = NOW() + make_interval(secs => $2)
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE queue = $1 AND (locked_until IS NULL OR locked_until < NOW())
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, queue, payload, delivery_count
            "#,
        )
        .bind(queue)
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let delivery_count: i32 = row.try_get("delivery_count")?;
        Ok(Some(Delivery {
            id: row.try_get("id")?,
            queue: row.try_get("queue")?,
            payload: row.try_get("payload")?,
            delivery_count: u32::try_from(delivery_count).unwrap_or(0),
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        // delivery_count identifies the current holder; a consumer whose lease
        // expired and was re-fetched no longer matches.
        let deleted =
            sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND delivery_count = $2")
                .bind(delivery.id)
                .bind(i64::from(delivery.delivery_count))
                .execute(&self.pool)
                .await?
                .rows_affected();

        if deleted == 0 {
            return Err(QueueError::UnknownDelivery(delivery.id));
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        let target = if requeue {
            delivery.queue.clone()
        } else {
            dead_letter_queue(&delivery.queue)
        };

        let updated = sqlx::query(
            "UPDATE queue_messages SET queue = $2, locked_until = NULL WHERE id = $1 AND delivery_count = $3",
        )
        .bind(delivery.id)
        .bind(target)
        .bind(i64::from(delivery.delivery_count))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(QueueError::UnknownDelivery(delivery.id));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
