use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, OrderStatus, ProductId, RequestId};
use tokio::sync::{Mutex, RwLock};

use crate::{
    InventoryItem, InventoryLedger, LedgerError, NewOrder, Order, OrderCreation, OrderLedger,
    Reservation, ReservationOutcome, Result, SettledOutcome, ShortfallPolicy, StatusChange,
};

/// Simulated outage switch shared by the in-memory ledgers.
#[derive(Debug, Default)]
struct FaultInjector {
    unavailable: AtomicBool,
    fail_next: AtomicUsize,
}

impl FaultInjector {
    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger is offline".to_string()));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(LedgerError::Unavailable(
                "injected transient failure".to_string(),
            ));
        }
        Ok(())
    }
}

/// What a settled request ID was used for.
#[derive(Debug, Clone)]
struct Settlement {
    product_id: ProductId,
    quantity: u32,
    outcome: SettledOutcome,
}

#[derive(Debug, Default)]
struct InventoryState {
    items: HashMap<ProductId, InventoryItem>,
    processed: HashMap<RequestId, Settlement>,
}

/// In-memory inventory ledger for testing.
///
/// The dedup insert and the conditional decrement happen under a single lock,
/// which gives the same all-or-nothing behaviour as the PostgreSQL transaction.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryLedger {
    state: Arc<Mutex<InventoryState>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryInventoryLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the store going offline (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` operations fail with a transient error.
    pub fn fail_next(&self, count: usize) {
        self.faults.fail_next.store(count, Ordering::SeqCst);
    }

    /// Returns the number of settled request IDs.
    pub async fn processed_count(&self) -> usize {
        self.state.lock().await.processed.len()
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<InventoryItem> {
        self.faults.check()?;
        let mut state = self.state.lock().await;

        let item = state
            .items
            .entry(product_id.clone())
            .or_insert_with(|| InventoryItem {
                product_id: product_id.clone(),
                quantity: 0,
                updated_at: Utc::now(),
            });
        item.quantity += i64::from(quantity);
        item.updated_at = Utc::now();

        Ok(item.clone())
    }

    async fn get_item(&self, product_id: &ProductId) -> Result<Option<InventoryItem>> {
        self.faults.check()?;
        Ok(self.state.lock().await.items.get(product_id).cloned())
    }

    async fn reserve(
        &self,
        reservation: &Reservation,
        policy: ShortfallPolicy,
    ) -> Result<ReservationOutcome> {
        self.faults.check()?;
        let mut state = self.state.lock().await;

        if let Some(recorded) = state.processed.get(&reservation.request_id) {
            let outcome = if reservation.matches(&recorded.product_id, recorded.quantity) {
                ReservationOutcome::AlreadyProcessed(recorded.outcome)
            } else {
                ReservationOutcome::Mismatched
            };
            metrics::counter!("ledger_reservations_total", "outcome" => outcome.label())
                .increment(1);
            return Ok(outcome);
        }

        let requested = i64::from(reservation.quantity);
        let decremented = match state.items.get_mut(&reservation.product_id) {
            Some(item) if item.quantity >= requested => {
                item.quantity -= requested;
                item.updated_at = Utc::now();
                Some(item.quantity)
            }
            _ => None,
        };

        let settle = |outcome| Settlement {
            product_id: reservation.product_id.clone(),
            quantity: reservation.quantity,
            outcome,
        };
        let outcome = match decremented {
            Some(remaining) => {
                state.processed.insert(
                    reservation.request_id.clone(),
                    settle(SettledOutcome::Applied),
                );
                ReservationOutcome::Applied { remaining }
            }
            None => {
                if policy == ShortfallPolicy::Record {
                    state.processed.insert(
                        reservation.request_id.clone(),
                        settle(SettledOutcome::InsufficientStock),
                    );
                }
                ReservationOutcome::InsufficientStock
            }
        };

        metrics::counter!("ledger_reservations_total", "outcome" => outcome.label()).increment(1);
        Ok(outcome)
    }

    async fn health_check(&self) -> Result<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger is offline".to_string()));
        }
        Ok(())
    }
}

/// In-memory order ledger for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderLedger {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    faults: Arc<FaultInjector>,
}

impl InMemoryOrderLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the store going offline (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` operations fail with a transient error.
    pub fn fail_next(&self, count: usize) {
        self.faults.fail_next.store(count, Ordering::SeqCst);
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderLedger for InMemoryOrderLedger {
    async fn create_order(&self, new_order: NewOrder) -> Result<OrderCreation> {
        self.faults.check()?;
        let mut orders = self.orders.write().await;
        if let Some(existing) = orders
            .values()
            .find(|o| o.request_id == new_order.request_id)
        {
            return Ok(OrderCreation::Existing(existing.clone()));
        }

        let now = Utc::now();
        let order = Order {
            id: new_order.id,
            product_id: new_order.product_id,
            quantity: new_order.quantity,
            request_id: new_order.request_id,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        orders.insert(order.id, order.clone());
        Ok(OrderCreation::Created(order))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.faults.check()?;
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn transition(&self, order_id: OrderId, next: OrderStatus) -> Result<StatusChange> {
        self.faults.check()?;
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(LedgerError::OrderNotFound(order_id))?;

        if !order.status.can_transition_to(next) {
            return Ok(StatusChange::Skipped(order.clone()));
        }

        order.status = next;
        order.updated_at = Utc::now();
        Ok(StatusChange::Applied(order.clone()))
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        self.faults.check()?;
        let orders = self.orders.read().await;
        let mut matching: Vec<_> = orders
            .values()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        matching.sort_by_key(|o| o.created_at);
        Ok(matching)
    }

    async fn health_check(&self) -> Result<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger is offline".to_string()));
        }
        Ok(())
    }
}
