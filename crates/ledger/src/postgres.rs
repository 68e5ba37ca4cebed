use async_trait::async_trait;
use common::{OrderId, OrderStatus, ProductId, RequestId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    InventoryItem, InventoryLedger, LedgerError, NewOrder, Order, OrderCreation, OrderLedger,
    Reservation, ReservationOutcome, Result, SettledOutcome, ShortfallPolicy, StatusChange,
};

/// Runs the workspace migrations (inventory, orders and queue tables).
pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// PostgreSQL-backed inventory ledger.
#[derive(Clone)]
pub struct PostgresInventoryLedger {
    pool: PgPool,
}

impl PostgresInventoryLedger {
    /// Creates a new PostgreSQL inventory ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_item(row: PgRow) -> Result<InventoryItem> {
        Ok(InventoryItem {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: row.try_get("quantity")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl InventoryLedger for PostgresInventoryLedger {
    async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryItem> {
        let row = sqlx::query(
            r#"
            INSERT INTO inventory (product_id, quantity)
            VALUES ($1, $2)
            ON CONFLICT (product_id)
            DO UPDATE SET quantity = inventory.quantity + EXCLUDED.quantity, updated_at = NOW()
            RETURNING product_id, quantity, updated_at
            "#,
        )
        .bind(product_id.as_str())
        .bind(i64::from(quantity))
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_item(row)
    }

    async fn get_item(&self, product_id: &ProductId) -> Result<Option<InventoryItem>> {
        let row = sqlx::query(
            "SELECT product_id, quantity, updated_at FROM inventory WHERE product_id = $1",
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_item).transpose()
    }

    #[tracing::instrument(
        skip(self, reservation),
        fields(
            request_id = %reservation.request_id,
            product_id = %reservation.product_id,
            quantity = reservation.quantity
        )
    )]
    async fn reserve(
        &self,
        reservation: &Reservation,
        policy: ShortfallPolicy,
    ) -> Result<ReservationOutcome> {
        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pool.begin().await?;

        // The primary key on request_id is the concurrency control: a second
        // writer blocks until the first commits, then inserts nothing.
        let inserted = sqlx::query(
            r#"
            INSERT INTO processed_transactions (request_id, product_id, quantity, outcome)
            VALUES ($1, $2, $3, 'APPLIED')
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(reservation.request_id.as_str())
        .bind(reservation.product_id.as_str())
        .bind(i64::from(reservation.quantity))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let row = sqlx::query(
                "SELECT product_id, quantity, outcome FROM processed_transactions WHERE request_id = $1",
            )
            .bind(reservation.request_id.as_str())
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;

            let product_id = ProductId::new(row.try_get::<String, _>("product_id")?);
            let quantity: i64 = row.try_get("quantity")?;
            let recorded: String = row.try_get("outcome")?;
            let recorded = SettledOutcome::parse(&recorded).ok_or_else(|| {
                LedgerError::CorruptRecord(format!("unknown outcome '{recorded}'"))
            })?;

            let same_line = u32::try_from(quantity)
                .is_ok_and(|quantity| reservation.matches(&product_id, quantity));
            let outcome = if same_line {
                ReservationOutcome::AlreadyProcessed(recorded)
            } else {
                tracing::warn!(
                    recorded_product = %product_id,
                    recorded_quantity = quantity,
                    "Request ID reused for a different reservation"
                );
                ReservationOutcome::Mismatched
            };
            metrics::counter!("ledger_reservations_total", "outcome" => outcome.label())
                .increment(1);
            return Ok(outcome);
        }

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE inventory
            SET quantity = quantity - $1, updated_at = NOW()
            WHERE product_id = $2 AND quantity >= $1
            RETURNING quantity
            "#,
        )
        .bind(i64::from(reservation.quantity))
        .bind(reservation.product_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match remaining {
            Some(remaining) => {
                tx.commit().await?;
                ReservationOutcome::Applied { remaining }
            }
            None => {
                match policy {
                    ShortfallPolicy::Record => {
                        sqlx::query(
                            "UPDATE processed_transactions SET outcome = 'INSUFFICIENT_STOCK' WHERE request_id = $1",
                        )
                        .bind(reservation.request_id.as_str())
                        .execute(&mut *tx)
                        .await?;
                        tx.commit().await?;
                    }
                    ShortfallPolicy::Rollback => tx.rollback().await?,
                }
                ReservationOutcome::InsufficientStock
            }
        };

        metrics::counter!("ledger_reservations_total", "outcome" => outcome.label()).increment(1);
        Ok(outcome)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// PostgreSQL-backed order ledger.
#[derive(Clone)]
pub struct PostgresOrderLedger {
    pool: PgPool,
}

impl PostgresOrderLedger {
    /// Creates a new PostgreSQL order ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let quantity: i64 = row.try_get("quantity")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| LedgerError::CorruptRecord(format!("quantity {quantity}")))?,
            request_id: RequestId::new(row.try_get::<String, _>("request_id")?),
            status: OrderStatus::parse(&status)
                .ok_or_else(|| LedgerError::CorruptRecord(format!("status '{status}'")))?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl OrderLedger for PostgresOrderLedger {
    #[tracing::instrument(skip(self, order), fields(request_id = %order.request_id))]
    async fn create_order(&self, order: NewOrder) -> Result<OrderCreation> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (id, product_id, quantity, request_id, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (request_id) DO NOTHING
            RETURNING id, product_id, quantity, request_id, status, created_at, updated_at
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.product_id.as_str())
        .bind(i64::from(order.quantity))
        .bind(order.request_id.as_str())
        .bind(OrderStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(OrderCreation::Created(Self::row_to_order(row)?));
        }

        let existing = sqlx::query(
            r#"
            SELECT id, product_id, quantity, request_id, status, created_at, updated_at
            FROM orders
            WHERE request_id = $1
            "#,
        )
        .bind(order.request_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        tracing::debug!("Order already exists for request ID");

        Ok(OrderCreation::Existing(Self::row_to_order(existing)?))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, product_id, quantity, request_id, status, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn transition(&self, order_id: OrderId, next: OrderStatus) -> Result<StatusChange> {
        let allowed_from: Vec<String> = next
            .predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        // Single conditional UPDATE so concurrent writers cannot regress a status.
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING id, product_id, quantity, request_id, status, created_at, updated_at
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(next.as_str())
        .bind(allowed_from)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(StatusChange::Applied(Self::row_to_order(row)?));
        }

        match self.get_order(order_id).await? {
            Some(current) => Ok(StatusChange::Skipped(current)),
            None => Err(LedgerError::OrderNotFound(order_id)),
        }
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT id, product_id, quantity, request_id, status, created_at, updated_at
                    FROM orders
                    WHERE status = $1
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, product_id, quantity, request_id, status, created_at, updated_at
                    FROM orders
                    ORDER BY created_at ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
