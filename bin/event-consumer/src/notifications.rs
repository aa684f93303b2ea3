//! Simulated checkout receipts

use async_trait::async_trait;
use mesh_events::{CheckoutEvent, EventError, EventHandler, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Default)]
pub struct NotificationsHandler {
    sent: AtomicU64,
}

impl NotificationsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for NotificationsHandler {
    fn name(&self) -> &str {
        "notifications"
    }

    async fn handle(&self, event: &CheckoutEvent) -> Result<()> {
        if event.user_id.trim().is_empty() {
            return Err(EventError::Handler(format!(
                "no recipient for list {}",
                event.list_id
            )));
        }

        info!(
            event_id = %event.event_id,
            user_id = %event.user_id,
            list_id = %event.list_id,
            "Sending checkout receipt (simulated)"
        );
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_events::{
        ConsumerTopology, Disposition, EventPublisher, InMemoryBroker, DEAD_LETTER_QUEUE,
        NOTIFICATIONS_QUEUE, ORDERS_QUEUE,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sends_receipt_per_event() {
        let broker = Arc::new(InMemoryBroker::new());
        broker
            .declare_topology(&ConsumerTopology::checkout(NOTIFICATIONS_QUEUE))
            .unwrap();
        broker
            .declare_topology(&ConsumerTopology::checkout(ORDERS_QUEUE))
            .unwrap();
        let publisher = EventPublisher::checkout(broker.clone());
        publisher
            .publish(&CheckoutEvent::new("1", "u1", 10.0, vec![]))
            .await
            .unwrap();

        let handler = NotificationsHandler::new();
        let disposition = broker.consume_next(NOTIFICATIONS_QUEUE, &handler).await.unwrap();
        assert_eq!(disposition, Some(Disposition::Ack));
        assert_eq!(handler.sent(), 1);

        // The orders queue keeps its own copy
        assert_eq!(broker.depth(ORDERS_QUEUE), 1);
    }

    #[tokio::test]
    async fn test_missing_recipient_is_dead_lettered() {
        let broker = Arc::new(InMemoryBroker::new());
        broker
            .declare_topology(&ConsumerTopology::checkout(NOTIFICATIONS_QUEUE))
            .unwrap();
        EventPublisher::checkout(broker.clone())
            .publish(&CheckoutEvent::new("2", " ", 10.0, vec![]))
            .await
            .unwrap();

        let handler = NotificationsHandler::new();
        let disposition = broker.consume_next(NOTIFICATIONS_QUEUE, &handler).await.unwrap();
        assert_eq!(disposition, Some(Disposition::DeadLetter));
        assert_eq!(handler.sent(), 0);
        assert_eq!(broker.depth(DEAD_LETTER_QUEUE), 1);
    }
}
