//! Dual-path order fulfillment.
//!
//! An order first tries to reserve stock synchronously under a timeout. Any
//! soft failure hands the reservation to the durable queue instead, where the
//! inventory consumer applies it at most once per request ID and reports the
//! outcome back through a notification that the order side applies.
//!
//! ```text
//! place_order ──► reserve (timeout) ──► Completed
//!                      │ soft failure
//!                      ▼
//!               inventory_updates ──► ReservationHandler ──► order_notifications
//!                                                               │
//!                                     NotificationHandler ◄─────┘
//! ```

pub mod chaos;
pub mod consumer;
pub mod error;
pub mod intake;
pub mod notifications;
pub mod reservation_client;
pub mod stock;

pub use chaos::{ChaosConfig, ChaosInjector};
pub use consumer::ReservationHandler;
pub use error::{FulfillmentError, Result};
pub use intake::{IntakeConfig, OrderIntake, OrderPlacement, PlaceOrder, PlacementPath};
pub use notifications::NotificationHandler;
pub use reservation_client::{
    HttpReservationClient, INSUFFICIENT_STOCK_MESSAGE, LedgerReservationClient,
    ReservationAttempt, ReservationClient, ReservationRequest, SoftFailureReason,
    reserve_within,
};
pub use stock::{DecrementStock, StockService};
