//! Order-side consumer of completion notifications.

use async_trait::async_trait;
use common::CompletionNotification;
use ledger::{LedgerError, OrderLedger, StatusChange};
use queue::{Delivery, Disposition, MessageHandler};
use tracing::{debug, info, warn};

/// Applies reservation outcomes to the order ledger.
pub struct NotificationHandler<O> {
    orders: O,
}

impl<O: OrderLedger> NotificationHandler<O> {
    pub fn new(orders: O) -> Self {
        Self { orders }
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }
}

#[async_trait]
impl<O: OrderLedger> MessageHandler for NotificationHandler<O> {
    type Message = CompletionNotification;

    async fn handle(&self, notification: CompletionNotification, _delivery: &Delivery) -> Disposition {
        let order_id = notification.order_id;
        if !notification.status.is_terminal() {
            warn!(%order_id, status = %notification.status, "Notification with non-final status");
            return Disposition::Ack;
        }

        match self.orders.transition(order_id, notification.status).await {
            Ok(StatusChange::Applied(order)) => {
                info!(%order_id, status = %order.status, message = %notification.message, "Order updated");
                Disposition::Ack
            }
            Ok(StatusChange::Skipped(order)) if order.status == notification.status => {
                debug!(%order_id, "Order already in notified status");
                Disposition::Ack
            }
            Ok(StatusChange::Skipped(order)) => {
                warn!(
                    %order_id,
                    current = %order.status,
                    notified = %notification.status,
                    "Ignoring illegal status transition"
                );
                Disposition::Ack
            }
            Err(LedgerError::OrderNotFound(_)) => {
                warn!(%order_id, "Notification for unknown order");
                Disposition::Ack
            }
            Err(err) => {
                warn!(%order_id, error = %err, "Order ledger failure, requeueing");
                Disposition::Requeue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use common::{OrderId, OrderStatus, ProductId, RequestId};
    use ledger::{InMemoryOrderLedger, NewOrder};

    use super::*;

    fn delivery() -> Delivery {
        Delivery {
            id: 1,
            queue: common::NOTIFICATION_QUEUE.to_string(),
            payload: serde_json::Value::Null,
            delivery_count: 1,
        }
    }

    async fn queued_order(handler: &NotificationHandler<InMemoryOrderLedger>) -> OrderId {
        let order = handler
            .orders()
            .create_order(NewOrder::new(
                ProductId::new("SKU-001"),
                3,
                RequestId::new("req-1"),
            ))
            .await
            .unwrap()
            .into_order();
        handler
            .orders()
            .transition(order.id, OrderStatus::Queued)
            .await
            .unwrap();
        order.id
    }

    async fn status_of(handler: &NotificationHandler<InMemoryOrderLedger>, id: OrderId) -> OrderStatus {
        handler.orders().get_order(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_completion_marks_order_completed() {
        let handler = NotificationHandler::new(InMemoryOrderLedger::new());
        let id = queued_order(&handler).await;

        let disposition = handler
            .handle(CompletionNotification::completed(id), &delivery())
            .await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(status_of(&handler, id).await, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_repeated_notification_is_idempotent() {
        let handler = NotificationHandler::new(InMemoryOrderLedger::new());
        let id = queued_order(&handler).await;

        for _ in 0..2 {
            let disposition = handler
                .handle(CompletionNotification::reconciliation_needed(id), &delivery())
                .await;
            assert_eq!(disposition, Disposition::Ack);
        }
        assert_eq!(status_of(&handler, id).await, OrderStatus::ReconciliationNeeded);
    }

    #[tokio::test]
    async fn test_terminal_status_is_not_overwritten() {
        let handler = NotificationHandler::new(InMemoryOrderLedger::new());
        let id = queued_order(&handler).await;
        handler
            .handle(CompletionNotification::completed(id), &delivery())
            .await;

        let disposition = handler
            .handle(CompletionNotification::reconciliation_needed(id), &delivery())
            .await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(status_of(&handler, id).await, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_order_is_acked() {
        let handler = NotificationHandler::new(InMemoryOrderLedger::new());
        let disposition = handler
            .handle(CompletionNotification::completed(OrderId::new()), &delivery())
            .await;
        assert_eq!(disposition, Disposition::Ack);
    }

    #[tokio::test]
    async fn test_non_final_status_is_acked_without_change() {
        let handler = NotificationHandler::new(InMemoryOrderLedger::new());
        let id = queued_order(&handler).await;
        let notification = CompletionNotification {
            order_id: id,
            status: OrderStatus::Pending,
            message: "rewind".to_string(),
        };

        assert_eq!(handler.handle(notification, &delivery()).await, Disposition::Ack);
        assert_eq!(status_of(&handler, id).await, OrderStatus::Queued);
    }

    #[tokio::test]
    async fn test_ledger_outage_requeues() {
        let handler = NotificationHandler::new(InMemoryOrderLedger::new());
        let id = queued_order(&handler).await;
        handler.orders().set_unavailable(true);

        let disposition = handler
            .handle(CompletionNotification::completed(id), &delivery())
            .await;
        assert_eq!(disposition, Disposition::Requeue);
    }
}
