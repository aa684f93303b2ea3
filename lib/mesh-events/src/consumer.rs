//! Checkout event consumers
//!
//! One policy for every consumer: a payload that does not parse is dropped
//! (rejected without requeue), a handler failure is nacked without requeue
//! so the broker dead-letters it, success is acked exactly once.

use crate::{amqp, CheckoutEvent, ConsumerTopology, EventError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicConsumeOptions, BasicNackOptions, BasicRejectOptions};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use mesh_core::redact_credentials;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Business processing of one event
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &CheckoutEvent) -> Result<()>;
}

/// How a delivery is settled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Poison message, discarded
    Drop,
    /// Failed processing, routed to the dead-letter exchange
    DeadLetter,
}

/// Decode and handle one payload, deciding its disposition
pub async fn process_payload(handler: &dyn EventHandler, payload: &[u8]) -> Disposition {
    let event = match CheckoutEvent::from_slice(payload) {
        Ok(event) => event,
        Err(e) => {
            error!(consumer = handler.name(), error = %e, "Dropping malformed message");
            return Disposition::Drop;
        }
    };

    debug!(
        consumer = handler.name(),
        event_id = %event.event_id,
        list_id = %event.list_id,
        user_id = %event.user_id,
        "Processing checkout event"
    );

    match handler.handle(&event).await {
        Ok(()) => Disposition::Ack,
        Err(e) => {
            error!(
                consumer = handler.name(),
                event_id = %event.event_id,
                error = %e,
                "Handler failed, dead-lettering message"
            );
            Disposition::DeadLetter
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub url: String,
    pub topology: ConsumerTopology,
    pub consumer_tag: String,
    /// Fixed delay between reconnection attempts
    pub reconnect_delay: Duration,
}

impl ConsumerConfig {
    pub fn new(url: impl Into<String>, topology: ConsumerTopology) -> Self {
        let consumer_tag = format!("{}-consumer", topology.queue.name);
        Self {
            url: url.into(),
            topology,
            consumer_tag,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Consumer bound to its own durable queue on the AMQP broker
pub struct AmqpConsumer {
    config: ConsumerConfig,
    handler: Arc<dyn EventHandler>,
}

impl AmqpConsumer {
    pub fn new(config: ConsumerConfig, handler: Arc<dyn EventHandler>) -> Self {
        Self { config, handler }
    }

    /// Consume until the process ends.
    ///
    /// Fails only when the very first connection cannot be established;
    /// afterwards lost connections are retried with a fixed delay forever.
    pub async fn run(self) -> Result<()> {
        let mut session = self.setup().await?;

        loop {
            let (connection, consumer) = session;
            self.drain(consumer).await;
            close_connection(&connection).await;

            session = loop {
                tokio::time::sleep(self.config.reconnect_delay).await;
                match self.setup().await {
                    Ok(session) => break session,
                    Err(e) => {
                        error!(
                            queue = %self.config.topology.queue.name,
                            error = %e,
                            retry_in_ms = self.config.reconnect_delay.as_millis() as u64,
                            "Reconnect failed"
                        );
                    }
                }
            };
        }
    }

    async fn setup(&self) -> Result<(Connection, lapin::Consumer)> {
        let url = redact_credentials(&self.config.url);
        let topology = &self.config.topology;

        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(|e| EventError::Connection(format!("connect to {}: {}", url, e)))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| amqp::map_error("create channel", e))?;

        amqp::declare_consumer_topology(&channel, topology).await?;

        let consumer = channel
            .basic_consume(
                &topology.queue.name,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| amqp::map_error("start consumer", e))?;

        info!(
            url = %url,
            consumer = self.handler.name(),
            queue = %topology.queue.name,
            binding = %topology.binding.pattern,
            prefetch = topology.prefetch,
            "Waiting for checkout events"
        );

        Ok((connection, consumer))
    }

    /// Process deliveries until the stream ends or errors
    async fn drain(&self, mut consumer: lapin::Consumer) {
        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => self.process_delivery(delivery).await,
                Err(e) => {
                    error!(error = %e, "Consumer delivery error, will reconnect");
                    return;
                }
            }
        }
        warn!(queue = %self.config.topology.queue.name, "Consumer stream ended, reconnecting");
    }

    async fn process_delivery(&self, delivery: Delivery) {
        debug!(
            routing_key = %delivery.routing_key,
            redelivered = delivery.redelivered,
            "Received message"
        );

        let disposition = process_payload(self.handler.as_ref(), &delivery.data).await;

        let settled = match disposition {
            Disposition::Ack => delivery.ack(Default::default()).await,
            Disposition::Drop => {
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await
            }
            Disposition::DeadLetter => {
                delivery
                    .nack(BasicNackOptions {
                        multiple: false,
                        requeue: false,
                    })
                    .await
            }
        };

        if let Err(e) = settled {
            error!(error = %e, ?disposition, "Failed to settle message");
        }
    }
}

/// Close a connection being replaced. Closing one the broker already
/// dropped fails, which only matters for the log.
async fn close_connection(connection: &Connection) {
    if let Err(e) = connection.close(200, "reconnecting").await {
        debug!(error = %e, "Previous connection already closed");
    }
}
