//! Checkout event distribution over a durable topic exchange
//!
//! Publishers emit one event per completed checkout; every consumer owns a
//! durable queue bound to the exchange and settles each delivery itself.

pub mod amqp;
pub mod broker;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod event;
pub mod memory;
pub mod publisher;
pub mod topology;

pub use broker::Broker;
pub use connection::AmqpConnector;
pub use consumer::{process_payload, AmqpConsumer, ConsumerConfig, Disposition, EventHandler};
pub use error::{EventError, Result};
pub use event::CheckoutEvent;
pub use memory::{InMemoryBroker, Message};
pub use publisher::EventPublisher;
pub use topology::{
    topic_matches, Binding, ConsumerTopology, ExchangeKind, ExchangeSpec, QueueSpec,
    ANALYTICS_QUEUE, CHECKOUT_BINDING, CHECKOUT_ROUTING_KEY, DEAD_LETTER_EXCHANGE,
    DEAD_LETTER_QUEUE, EXCHANGE_NAME, NOTIFICATIONS_QUEUE, ORDERS_QUEUE,
};
