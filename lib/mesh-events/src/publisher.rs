use crate::{Broker, CheckoutEvent, ExchangeSpec, Result, CHECKOUT_ROUTING_KEY};
use std::sync::Arc;
use tracing::{info, warn};

/// Emits checkout events on the shopping exchange.
///
/// Connection failures propagate to the caller; an event is never dropped
/// silently.
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    exchange: ExchangeSpec,
    routing_key: String,
}

impl EventPublisher {
    pub fn new(
        broker: Arc<dyn Broker>,
        exchange: ExchangeSpec,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            exchange,
            routing_key: routing_key.into(),
        }
    }

    /// Publisher for `list.checkout.completed` on `shopping_events`
    pub fn checkout(broker: Arc<dyn Broker>) -> Self {
        Self::new(broker, ExchangeSpec::shopping_events(), CHECKOUT_ROUTING_KEY)
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Publish `event`; `false` means the outbound buffer refused it
    pub async fn publish(&self, event: &CheckoutEvent) -> Result<bool> {
        let payload = event.to_bytes()?;

        self.broker.declare_exchange(&self.exchange).await?;
        let accepted = self
            .broker
            .publish(&self.exchange.name, &self.routing_key, payload)
            .await?;

        if accepted {
            info!(
                event_id = %event.event_id,
                exchange = %self.exchange.name,
                routing_key = %self.routing_key,
                "Published checkout event"
            );
        } else {
            warn!(event_id = %event.event_id, "Publish refused, outbound buffer full");
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ConsumerTopology, EventError, ExchangeKind, InMemoryBroker, NOTIFICATIONS_QUEUE,
        ORDERS_QUEUE,
    };
    use async_trait::async_trait;

    #[tokio::test]
    async fn test_publish_fans_out_one_copy_per_queue() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare_topology(&ConsumerTopology::checkout(ORDERS_QUEUE)).unwrap();
        broker
            .declare_topology(&ConsumerTopology::checkout(NOTIFICATIONS_QUEUE))
            .unwrap();

        let publisher = EventPublisher::checkout(broker.clone());
        let items = vec![serde_json::json!({"productId": "p1"})];
        let mut event = CheckoutEvent::new("999", "u1", 50.0, items);
        event.event_id = "e1".to_string();

        assert!(publisher.publish(&event).await.unwrap());

        for queue in [ORDERS_QUEUE, NOTIFICATIONS_QUEUE] {
            let message = broker.fetch(queue).unwrap().unwrap();
            assert_eq!(message.routing_key, CHECKOUT_ROUTING_KEY);
            assert_eq!(CheckoutEvent::from_slice(&message.payload).unwrap(), event);
            assert!(broker.fetch(queue).unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_publish_without_consumers_still_declares_exchange() {
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = EventPublisher::checkout(broker.clone());

        let event = CheckoutEvent::new("1", "u1", 10.0, vec![]);
        assert!(publisher.publish(&event).await.unwrap());
    }

    #[tokio::test]
    async fn test_conflicting_exchange_fails_publish() {
        let broker = Arc::new(InMemoryBroker::new());
        broker
            .declare_exchange(&ExchangeSpec {
                kind: ExchangeKind::Direct,
                ..ExchangeSpec::shopping_events()
            })
            .await
            .unwrap();

        let publisher = EventPublisher::checkout(broker);
        let err = publisher
            .publish(&CheckoutEvent::new("1", "u1", 10.0, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::PreconditionFailed(_)));
    }

    struct Offline;

    #[async_trait]
    impl Broker for Offline {
        async fn declare_exchange(&self, _spec: &ExchangeSpec) -> Result<()> {
            Err(EventError::Connection("connection refused".to_string()))
        }

        async fn publish(
            &self,
            _exchange: &str,
            _routing_key: &str,
            _payload: Vec<u8>,
        ) -> Result<bool> {
            Err(EventError::Connection("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_connection_failure_propagates() {
        let publisher = EventPublisher::checkout(Arc::new(Offline));
        let err = publisher
            .publish(&CheckoutEvent::new("1", "u1", 10.0, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Connection(_)));
    }
}
