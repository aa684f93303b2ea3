//! In-process broker with durable-queue semantics
//!
//! Messages sit in their queue until settled, whether or not a consumer is
//! attached. Each bound queue receives its own copy of a published payload.

use crate::consumer::{process_payload, Disposition, EventHandler};
use crate::{Binding, Broker, ConsumerTopology, EventError, ExchangeSpec, QueueSpec, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A delivery held by a queue
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

struct Queue {
    spec: QueueSpec,
    ready: VecDeque<Message>,
    unacked: Vec<Message>,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
    next_tag: u64,
}

impl State {
    fn route(&mut self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<usize> {
        let spec = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| EventError::UnknownExchange(exchange.to_string()))?;
        let kind = spec.kind;

        let mut targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && kind.routes(&b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect();
        targets.sort();
        targets.dedup();

        for name in &targets {
            self.next_tag += 1;
            let message = Message {
                delivery_tag: self.next_tag,
                routing_key: routing_key.to_string(),
                payload: payload.to_vec(),
                redelivered: false,
            };
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(message);
            }
        }
        Ok(targets.len())
    }
}

#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        let mut state = self.lock();
        match state.queues.get(&spec.name) {
            Some(existing) if existing.spec != *spec => Err(EventError::PreconditionFailed(format!(
                "queue {} already declared with different arguments",
                spec.name
            ))),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    spec.name.clone(),
                    Queue {
                        spec: spec.clone(),
                        ready: VecDeque::new(),
                        unacked: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    pub fn bind(&self, binding: &Binding) -> Result<()> {
        let mut state = self.lock();
        if !state.exchanges.contains_key(&binding.exchange) {
            return Err(EventError::UnknownExchange(binding.exchange.clone()));
        }
        if !state.queues.contains_key(&binding.queue) {
            return Err(EventError::UnknownQueue(binding.queue.clone()));
        }
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    /// Declare a consumer's exchange, queue, binding and dead-letter path
    pub fn declare_topology(&self, topology: &ConsumerTopology) -> Result<()> {
        if let Some((exchange, queue)) = &topology.dead_letter {
            self.declare_exchange_sync(exchange)?;
            self.declare_queue(queue)?;
        }
        if let Some(binding) = topology.dead_letter_binding() {
            self.bind(&binding)?;
        }
        self.declare_exchange_sync(&topology.exchange)?;
        self.declare_queue(&topology.queue)?;
        self.bind(&topology.binding)
    }

    fn declare_exchange_sync(&self, spec: &ExchangeSpec) -> Result<()> {
        let mut state = self.lock();
        match state.exchanges.get(&spec.name) {
            Some(existing) if existing != spec => Err(EventError::PreconditionFailed(format!(
                "exchange {} already declared as {} durable={}",
                spec.name,
                existing.kind.as_str(),
                existing.durable
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(spec.name.clone(), spec.clone());
                Ok(())
            }
        }
    }

    /// Take the next ready message; it stays unacked until settled
    pub fn fetch(&self, queue: &str) -> Result<Option<Message>> {
        let mut state = self.lock();
        let queue = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| EventError::UnknownQueue(queue.to_string()))?;

        let message = queue.ready.pop_front();
        if let Some(message) = &message {
            queue.unacked.push(message.clone());
        }
        Ok(message)
    }

    /// Settle an unacked delivery. A dead-lettered message leaves the queue
    /// only once it has been routed to the dead-letter exchange.
    pub fn settle(
        &self,
        queue_name: &str,
        delivery_tag: u64,
        disposition: Disposition,
    ) -> Result<()> {
        let mut state = self.lock();
        let queue = state
            .queues
            .get(queue_name)
            .ok_or_else(|| EventError::UnknownQueue(queue_name.to_string()))?;

        let Some(message) = queue.unacked.iter().find(|m| m.delivery_tag == delivery_tag) else {
            return Err(EventError::Handler(format!(
                "unknown delivery tag {} on {}",
                delivery_tag, queue_name
            )));
        };

        if disposition == Disposition::DeadLetter {
            if let Some(dlx) = queue.spec.dead_letter_exchange.clone() {
                let routing_key = message.routing_key.clone();
                let payload = message.payload.clone();
                state.route(&dlx, &routing_key, &payload)?;
            }
        }

        if let Some(queue) = state.queues.get_mut(queue_name) {
            queue.unacked.retain(|m| m.delivery_tag != delivery_tag);
        }
        debug!(queue = %queue_name, delivery_tag, ?disposition, "Settled message");
        Ok(())
    }

    /// Return every unacked delivery to the head of its queue, as happens
    /// when a consumer dies before acknowledging
    pub fn recover(&self, queue_name: &str) -> Result<usize> {
        let mut state = self.lock();
        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| EventError::UnknownQueue(queue_name.to_string()))?;

        let unacked = std::mem::take(&mut queue.unacked);
        let count = unacked.len();
        for mut message in unacked.into_iter().rev() {
            message.redelivered = true;
            queue.ready.push_front(message);
        }
        Ok(count)
    }

    /// Deliver the next message of `queue` to `handler` and settle it
    pub async fn consume_next(
        &self,
        queue: &str,
        handler: &dyn EventHandler,
    ) -> Result<Option<Disposition>> {
        let Some(message) = self.fetch(queue)? else {
            return Ok(None);
        };
        let disposition = process_payload(handler, &message.payload).await;
        self.settle(queue, message.delivery_tag, disposition)?;
        Ok(Some(disposition))
    }

    /// Messages waiting in `queue`
    pub fn depth(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map(|q| q.ready.len()).unwrap_or(0)
    }

    pub fn unacked(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map(|q| q.unacked.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()> {
        self.declare_exchange_sync(spec)
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<bool> {
        let delivered = self.lock().route(exchange, routing_key, &payload)?;
        debug!(exchange, routing_key, queues = delivered, "Published message");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CheckoutEvent, ExchangeKind, CHECKOUT_ROUTING_KEY, DEAD_LETTER_QUEUE, EXCHANGE_NAME,
        NOTIFICATIONS_QUEUE, ORDERS_QUEUE,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        handled: AtomicUsize,
        fail: bool,
    }

    impl Counting {
        fn new(fail: bool) -> Self {
            Self {
                handled: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl EventHandler for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _event: &CheckoutEvent) -> Result<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EventError::Handler("downstream rejected".to_string()));
            }
            Ok(())
        }
    }

    fn broker_with(queues: &[&str]) -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        for queue in queues {
            broker.declare_topology(&ConsumerTopology::checkout(queue)).unwrap();
        }
        broker
    }

    fn event_bytes(id: &str) -> Vec<u8> {
        let mut event = CheckoutEvent::new("999", "u1", 50.0, vec![]);
        event.event_id = id.to_string();
        event.to_bytes().unwrap()
    }

    #[tokio::test]
    async fn test_each_bound_queue_gets_one_copy() {
        let broker = broker_with(&[ORDERS_QUEUE, NOTIFICATIONS_QUEUE]);

        broker
            .publish(EXCHANGE_NAME, CHECKOUT_ROUTING_KEY, event_bytes("e1"))
            .await
            .unwrap();

        for queue in [ORDERS_QUEUE, NOTIFICATIONS_QUEUE] {
            assert_eq!(broker.depth(queue), 1);
            let message = broker.fetch(queue).unwrap().unwrap();
            assert_eq!(CheckoutEvent::from_slice(&message.payload).unwrap().event_id, "e1");
            assert!(broker.fetch(queue).unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_unmatched_routing_key_reaches_no_queue() {
        let broker = broker_with(&[ORDERS_QUEUE]);
        broker
            .publish(EXCHANGE_NAME, "list.created", event_bytes("e1"))
            .await
            .unwrap();
        assert_eq!(broker.depth(ORDERS_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_offline_consumer_receives_after_coming_online() {
        let broker = broker_with(&[ORDERS_QUEUE]);

        // Published while nobody consumes
        broker
            .publish(EXCHANGE_NAME, CHECKOUT_ROUTING_KEY, event_bytes("e1"))
            .await
            .unwrap();

        let handler = Counting::new(false);
        let disposition = broker.consume_next(ORDERS_QUEUE, &handler).await.unwrap();
        assert_eq!(disposition, Some(Disposition::Ack));
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        assert_eq!(broker.depth(ORDERS_QUEUE), 0);
        assert_eq!(broker.unacked(ORDERS_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_crash_before_ack_redelivers() {
        let broker = broker_with(&[ORDERS_QUEUE]);
        broker
            .publish(EXCHANGE_NAME, CHECKOUT_ROUTING_KEY, event_bytes("e1"))
            .await
            .unwrap();

        let first = broker.fetch(ORDERS_QUEUE).unwrap().unwrap();
        assert!(!first.redelivered);
        assert_eq!(broker.recover(ORDERS_QUEUE).unwrap(), 1);

        let again = broker.fetch(ORDERS_QUEUE).unwrap().unwrap();
        assert!(again.redelivered);
        assert_eq!(again.payload, first.payload);
    }

    #[tokio::test]
    async fn test_handler_failure_is_dead_lettered() {
        let broker = broker_with(&[ORDERS_QUEUE]);
        broker
            .publish(EXCHANGE_NAME, CHECKOUT_ROUTING_KEY, event_bytes("e1"))
            .await
            .unwrap();

        let disposition = broker
            .consume_next(ORDERS_QUEUE, &Counting::new(true))
            .await
            .unwrap();
        assert_eq!(disposition, Some(Disposition::DeadLetter));
        assert_eq!(broker.depth(ORDERS_QUEUE), 0);
        assert_eq!(broker.depth(DEAD_LETTER_QUEUE), 1);
    }

    #[tokio::test]
    async fn test_undeclared_dead_letter_exchange_keeps_message() {
        let broker = InMemoryBroker::new();
        let topology = ConsumerTopology {
            dead_letter: None,
            ..ConsumerTopology::checkout(ORDERS_QUEUE)
        };
        broker.declare_topology(&topology).unwrap();
        broker
            .publish(EXCHANGE_NAME, CHECKOUT_ROUTING_KEY, event_bytes("e1"))
            .await
            .unwrap();

        let err = broker
            .consume_next(ORDERS_QUEUE, &Counting::new(true))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::UnknownExchange(_)));
        assert_eq!(broker.unacked(ORDERS_QUEUE), 1);

        assert_eq!(broker.recover(ORDERS_QUEUE).unwrap(), 1);
        let again = broker.fetch(ORDERS_QUEUE).unwrap().unwrap();
        assert!(again.redelivered);
        assert_eq!(CheckoutEvent::from_slice(&again.payload).unwrap().event_id, "e1");
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let broker = broker_with(&[ORDERS_QUEUE]);
        broker
            .publish(EXCHANGE_NAME, CHECKOUT_ROUTING_KEY, b"not json".to_vec())
            .await
            .unwrap();

        let handler = Counting::new(false);
        let disposition = broker.consume_next(ORDERS_QUEUE, &handler).await.unwrap();
        assert_eq!(disposition, Some(Disposition::Drop));
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);
        assert_eq!(broker.depth(ORDERS_QUEUE), 0);
        assert_eq!(broker.depth(DEAD_LETTER_QUEUE), 0);
    }

    #[tokio::test]
    async fn test_mismatched_exchange_declaration_rejected() {
        let broker = broker_with(&[ORDERS_QUEUE]);

        let non_durable = ExchangeSpec {
            durable: false,
            ..ExchangeSpec::shopping_events()
        };
        let err = broker.declare_exchange(&non_durable).await.unwrap_err();
        assert!(matches!(err, EventError::PreconditionFailed(_)));

        let fanout = ExchangeSpec {
            kind: ExchangeKind::Fanout,
            ..ExchangeSpec::shopping_events()
        };
        assert!(broker.declare_exchange(&fanout).await.is_err());

        // Identical redeclaration is idempotent
        assert!(broker
            .declare_exchange(&ExchangeSpec::shopping_events())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_exchange_fails() {
        let broker = InMemoryBroker::new();
        let err = broker
            .publish(EXCHANGE_NAME, CHECKOUT_ROUTING_KEY, event_bytes("e1"))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::UnknownExchange(_)));
    }

    #[test]
    fn test_unknown_queue() {
        let broker = InMemoryBroker::new();
        assert!(matches!(broker.fetch("nope"), Err(EventError::UnknownQueue(_))));
    }
}
