//! Shared types for the order and inventory services.

pub mod messages;
pub mod status;
pub mod types;

pub use messages::{CompletionNotification, NOTIFICATION_QUEUE, RESERVATION_QUEUE, ReservationMessage};
pub use status::OrderStatus;
pub use types::{OrderId, ProductId, RequestId};
