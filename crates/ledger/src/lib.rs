//! Inventory and order ledgers.
//!
//! Both ledgers are defined as async traits with an in-memory implementation
//! for tests and a PostgreSQL implementation for deployment. The inventory
//! ledger owns the dedup table that makes reservations idempotent.

pub mod error;
pub mod inventory;
pub mod memory;
pub mod orders;
pub mod postgres;

pub use error::{LedgerError, Result};
pub use inventory::{
    InventoryItem, InventoryLedger, Reservation, ReservationOutcome, SettledOutcome,
    ShortfallPolicy,
};
pub use memory::{InMemoryInventoryLedger, InMemoryOrderLedger};
pub use orders::{NewOrder, Order, OrderCreation, OrderLedger, StatusChange};
pub use postgres::{PostgresInventoryLedger, PostgresOrderLedger, run_migrations};
