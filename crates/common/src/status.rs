//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its fulfillment lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──┬──────────────► Completed
///           ├──────────────► ReconciliationNeeded
///           └──► Queued ──┬► Completed
///                         └► ReconciliationNeeded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order persisted, reservation not yet settled.
    #[default]
    Pending,

    /// Stock has been reserved (terminal state).
    Completed,

    /// Reservation handed to the durable queue.
    Queued,

    /// Neither path could reserve the stock; needs manual follow-up (terminal state).
    ReconciliationNeeded,
}

impl OrderStatus {
    /// All statuses, in declaration order.
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Completed,
        OrderStatus::Queued,
        OrderStatus::ReconciliationNeeded,
    ];

    /// Returns true if the order may move from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Completed)
                | (Pending, Queued)
                | (Pending, ReconciliationNeeded)
                | (Queued, Completed)
                | (Queued, ReconciliationNeeded)
        )
    }

    /// Statuses from which `self` can be reached.
    pub fn predecessors(&self) -> Vec<OrderStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(*self))
            .collect()
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::ReconciliationNeeded)
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Queued => "QUEUED",
            OrderStatus::ReconciliationNeeded => "RECONCILIATION_NEEDED",
        }
    }

    /// Parses a wire name back into a status.
    pub fn parse(value: &str) -> Option<OrderStatus> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
