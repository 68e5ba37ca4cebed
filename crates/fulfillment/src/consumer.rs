//! Inventory-side consumer of queued reservations.

use async_trait::async_trait;
use common::{CompletionNotification, NOTIFICATION_QUEUE, ReservationMessage};
use ledger::{InventoryLedger, Reservation, ReservationOutcome, SettledOutcome, ShortfallPolicy};
use queue::{Broker, BrokerExt, Delivery, Disposition, MessageHandler};
use tracing::{error, info, warn};

/// Applies queued reservations exactly once per request ID and announces the
/// outcome on the notification queue.
///
/// A redelivered message finds its request ID already settled and only
/// re-announces the recorded outcome, so a failed notification publish can
/// be retried by requeueing the reservation. Messages that can never be
/// applied are dead-lettered after announcing `RECONCILIATION_NEEDED`.
pub struct ReservationHandler<L, B> {
    ledger: L,
    broker: B,
}

impl<L: InventoryLedger, B: Broker> ReservationHandler<L, B> {
    pub fn new(ledger: L, broker: B) -> Self {
        Self { ledger, broker }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Publishes `notification`, then settles the delivery with `settled`.
    /// A failed publish requeues so the redelivery can announce again.
    async fn announce(
        &self,
        notification: &CompletionNotification,
        settled: Disposition,
    ) -> Disposition {
        match self
            .broker
            .publish_json(NOTIFICATION_QUEUE, notification)
            .await
        {
            Ok(()) => settled,
            Err(err) => {
                warn!(error = %err, "Notification publish failed, requeueing reservation");
                Disposition::Requeue
            }
        }
    }
}

#[async_trait]
impl<L: InventoryLedger, B: Broker> MessageHandler for ReservationHandler<L, B> {
    type Message = ReservationMessage;

    #[tracing::instrument(
        skip(self, message, delivery),
        fields(
            order_id = %message.order_id,
            request_id = %message.request_id,
            delivery = delivery.delivery_count
        )
    )]
    async fn handle(&self, message: ReservationMessage, delivery: &Delivery) -> Disposition {
        if message.quantity == 0 {
            warn!("Reservation with zero quantity");
            return Disposition::DeadLetter;
        }

        let reservation = Reservation::new(
            message.request_id.clone(),
            message.product_id.clone(),
            message.quantity,
        );

        let outcome = match self
            .ledger
            .reserve(&reservation, ShortfallPolicy::Record)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) if err.is_transient() => {
                warn!(error = %err, "Transient ledger failure, requeueing");
                return Disposition::Requeue;
            }
            Err(err) => {
                error!(error = %err, "Ledger rejected reservation, dead-lettering");
                let notification = CompletionNotification::reconciliation_needed(message.order_id);
                return self.announce(&notification, Disposition::DeadLetter).await;
            }
        };

        let settled = match outcome {
            ReservationOutcome::Applied { remaining } => {
                info!(remaining, "Reservation applied");
                SettledOutcome::Applied
            }
            ReservationOutcome::InsufficientStock => {
                warn!(product_id = %message.product_id, "Insufficient stock for queued reservation");
                SettledOutcome::InsufficientStock
            }
            ReservationOutcome::AlreadyProcessed(settled) => {
                info!(outcome = settled.as_str(), "Duplicate delivery, re-announcing outcome");
                settled
            }
            ReservationOutcome::Mismatched => {
                error!(
                    product_id = %message.product_id,
                    quantity = message.quantity,
                    "Request ID already settled for a different reservation, dead-lettering"
                );
                let notification = CompletionNotification::reconciliation_needed(message.order_id);
                return self.announce(&notification, Disposition::DeadLetter).await;
            }
        };

        let notification = match settled {
            SettledOutcome::Applied => CompletionNotification::completed(message.order_id),
            SettledOutcome::InsufficientStock => {
                CompletionNotification::reconciliation_needed(message.order_id)
            }
        };

        self.announce(&notification, Disposition::Ack).await
    }
}

#[cfg(test)]
mod tests {
    use common::{OrderId, OrderStatus, ProductId, RequestId};
    use ledger::{InMemoryInventoryLedger, LedgerError};
    use queue::InMemoryBroker;

    use super::*;

    fn delivery(count: u32) -> Delivery {
        Delivery {
            id: 1,
            queue: common::RESERVATION_QUEUE.to_string(),
            payload: serde_json::Value::Null,
            delivery_count: count,
        }
    }

    fn message(order_id: OrderId, request_id: &str, quantity: u32) -> ReservationMessage {
        ReservationMessage {
            product_id: ProductId::new("SKU-001"),
            quantity,
            request_id: RequestId::new(request_id),
            order_id,
        }
    }

    async fn handler_with_stock(
        quantity: u32,
    ) -> (
        ReservationHandler<InMemoryInventoryLedger, InMemoryBroker>,
        InMemoryBroker,
    ) {
        let ledger = InMemoryInventoryLedger::new();
        ledger
            .restock(&ProductId::new("SKU-001"), quantity)
            .await
            .unwrap();
        let broker = InMemoryBroker::new();
        (ReservationHandler::new(ledger, broker.clone()), broker)
    }

    async fn stock(handler: &ReservationHandler<InMemoryInventoryLedger, InMemoryBroker>) -> i64 {
        handler
            .ledger()
            .get_item(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap()
            .quantity
    }

    async fn notifications(broker: &InMemoryBroker) -> Vec<CompletionNotification> {
        broker
            .peek(NOTIFICATION_QUEUE)
            .await
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_applies_and_notifies_completion() {
        let (handler, broker) = handler_with_stock(10).await;
        let order_id = OrderId::new();

        let disposition = handler.handle(message(order_id, "req-1", 3), &delivery(1)).await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(stock(&handler).await, 7);
        assert_eq!(
            notifications(&broker).await,
            vec![CompletionNotification::completed(order_id)]
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery_reannounces_without_decrement() {
        let (handler, broker) = handler_with_stock(10).await;
        let order_id = OrderId::new();

        for count in 1..=3 {
            let disposition = handler
                .handle(message(order_id, "req-1", 3), &delivery(count))
                .await;
            assert_eq!(disposition, Disposition::Ack);
        }

        assert_eq!(stock(&handler).await, 7);
        let sent = notifications(&broker).await;
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|n| n.status == OrderStatus::Completed));
    }

    #[tokio::test]
    async fn test_shortfall_is_recorded_and_acked() {
        let (handler, broker) = handler_with_stock(2).await;
        let order_id = OrderId::new();

        let disposition = handler.handle(message(order_id, "req-1", 5), &delivery(1)).await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(stock(&handler).await, 2);
        assert_eq!(handler.ledger().processed_count().await, 1);
        assert_eq!(
            notifications(&broker).await,
            vec![CompletionNotification::reconciliation_needed(order_id)]
        );

        // A later restock does not revive a recorded shortfall.
        handler
            .ledger()
            .restock(&ProductId::new("SKU-001"), 10)
            .await
            .unwrap();
        handler.handle(message(order_id, "req-1", 5), &delivery(2)).await;
        assert_eq!(stock(&handler).await, 12);
    }

    #[tokio::test]
    async fn test_transient_ledger_failure_requeues_without_marker() {
        let (handler, broker) = handler_with_stock(10).await;
        handler.ledger().fail_next(1);
        let order_id = OrderId::new();

        let first = handler.handle(message(order_id, "req-1", 3), &delivery(1)).await;
        assert_eq!(first, Disposition::Requeue);
        assert_eq!(handler.ledger().processed_count().await, 0);
        assert!(notifications(&broker).await.is_empty());

        let second = handler.handle(message(order_id, "req-1", 3), &delivery(2)).await;
        assert_eq!(second, Disposition::Ack);
        assert_eq!(stock(&handler).await, 7);
    }

    #[tokio::test]
    async fn test_notification_failure_requeues_and_retry_does_not_double_apply() {
        let (handler, broker) = handler_with_stock(10).await;
        let order_id = OrderId::new();

        broker.set_online(false);
        let first = handler.handle(message(order_id, "req-1", 3), &delivery(1)).await;
        assert_eq!(first, Disposition::Requeue);
        assert_eq!(stock(&handler).await, 7);

        broker.set_online(true);
        let second = handler.handle(message(order_id, "req-1", 3), &delivery(2)).await;
        assert_eq!(second, Disposition::Ack);
        assert_eq!(stock(&handler).await, 7);
        assert_eq!(
            notifications(&broker).await,
            vec![CompletionNotification::completed(order_id)]
        );
    }

    #[tokio::test]
    async fn test_request_id_settled_for_other_line_is_dead_lettered() {
        let (handler, broker) = handler_with_stock(10).await;
        let first = OrderId::new();
        handler.handle(message(first, "req-x", 3), &delivery(1)).await;

        let second = OrderId::new();
        let disposition = handler.handle(message(second, "req-x", 5), &delivery(1)).await;

        assert_eq!(disposition, Disposition::DeadLetter);
        assert_eq!(stock(&handler).await, 7);
        assert_eq!(
            notifications(&broker).await,
            vec![
                CompletionNotification::completed(first),
                CompletionNotification::reconciliation_needed(second),
            ]
        );
    }

    /// Ledger whose every reservation fails with a non-retryable error.
    struct CorruptLedger;

    #[async_trait]
    impl InventoryLedger for CorruptLedger {
        async fn restock(
            &self,
            _product_id: &ProductId,
            _quantity: u32,
        ) -> ledger::Result<ledger::InventoryItem> {
            Err(LedgerError::CorruptRecord("bad row".to_string()))
        }

        async fn get_item(
            &self,
            _product_id: &ProductId,
        ) -> ledger::Result<Option<ledger::InventoryItem>> {
            Ok(None)
        }

        async fn reserve(
            &self,
            _reservation: &Reservation,
            _policy: ShortfallPolicy,
        ) -> ledger::Result<ReservationOutcome> {
            Err(LedgerError::CorruptRecord("unknown outcome 'LOST'".to_string()))
        }

        async fn health_check(&self) -> ledger::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_permanent_ledger_failure_is_dead_lettered_and_flagged() {
        let broker = InMemoryBroker::new();
        let handler = ReservationHandler::new(CorruptLedger, broker.clone());
        let order_id = OrderId::new();

        let disposition = handler.handle(message(order_id, "req-1", 3), &delivery(1)).await;

        assert_eq!(disposition, Disposition::DeadLetter);
        assert_eq!(
            notifications(&broker).await,
            vec![CompletionNotification::reconciliation_needed(order_id)]
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_requeues_when_flag_cannot_be_published() {
        let broker = InMemoryBroker::new();
        broker.set_online(false);
        let handler = ReservationHandler::new(CorruptLedger, broker.clone());

        let disposition = handler
            .handle(message(OrderId::new(), "req-1", 3), &delivery(1))
            .await;
        assert_eq!(disposition, Disposition::Requeue);
    }

    #[tokio::test]
    async fn test_zero_quantity_is_dead_lettered() {
        let (handler, _broker) = handler_with_stock(10).await;
        let disposition = handler
            .handle(message(OrderId::new(), "req-1", 0), &delivery(1))
            .await;
        assert_eq!(disposition, Disposition::DeadLetter);
    }
}
