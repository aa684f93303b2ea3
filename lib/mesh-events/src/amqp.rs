//! AMQP declarations and error mapping over lapin

use crate::{Binding, ConsumerTopology, EventError, ExchangeKind, ExchangeSpec, QueueSpec, Result};
use lapin::options::{
    BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::{AMQPValue, FieldTable};
use lapin::Channel;
use tracing::{debug, error};

/// Queue argument naming the dead-letter exchange
const DEAD_LETTER_ARGUMENT: &str = "x-dead-letter-exchange";

/// Map a lapin error, singling out rejected declarations
pub fn map_error(context: &str, err: lapin::Error) -> EventError {
    if let lapin::Error::ProtocolError(amqp_error) = &err {
        if let AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED) = amqp_error.kind() {
            error!(
                context,
                error = %err,
                "Declaration conflicts with the existing broker object; \
                 its type or durability differs and it must be deleted or aligned"
            );
            return EventError::PreconditionFailed(format!("{}: {}", context, err));
        }
    }
    EventError::Connection(format!("{}: {}", context, err))
}

fn lapin_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
    }
}

pub async fn declare_exchange(channel: &Channel, spec: &ExchangeSpec) -> Result<()> {
    channel
        .exchange_declare(
            &spec.name,
            lapin_kind(spec.kind),
            ExchangeDeclareOptions {
                durable: spec.durable,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| map_error("declare exchange", e))?;

    debug!(
        exchange = %spec.name,
        kind = spec.kind.as_str(),
        durable = spec.durable,
        "Exchange declared"
    );
    Ok(())
}

pub async fn declare_queue(channel: &Channel, spec: &QueueSpec) -> Result<()> {
    let mut arguments = FieldTable::default();
    if let Some(dlx) = &spec.dead_letter_exchange {
        arguments.insert(
            DEAD_LETTER_ARGUMENT.into(),
            AMQPValue::LongString(dlx.as_str().into()),
        );
    }

    channel
        .queue_declare(
            &spec.name,
            QueueDeclareOptions {
                durable: spec.durable,
                ..Default::default()
            },
            arguments,
        )
        .await
        .map_err(|e| map_error("declare queue", e))?;

    debug!(queue = %spec.name, durable = spec.durable, "Queue declared");
    Ok(())
}

pub async fn bind(channel: &Channel, binding: &Binding) -> Result<()> {
    channel
        .queue_bind(
            &binding.queue,
            &binding.exchange,
            &binding.pattern,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| map_error("bind queue", e))?;
    Ok(())
}

/// Declare everything a consumer needs and apply its prefetch limit
pub async fn declare_consumer_topology(
    channel: &Channel,
    topology: &ConsumerTopology,
) -> Result<()> {
    if let Some((exchange, queue)) = &topology.dead_letter {
        declare_exchange(channel, exchange).await?;
        declare_queue(channel, queue).await?;
    }
    if let Some(binding) = topology.dead_letter_binding() {
        bind(channel, &binding).await?;
    }

    declare_exchange(channel, &topology.exchange).await?;
    declare_queue(channel, &topology.queue).await?;
    bind(channel, &topology.binding).await?;

    channel
        .basic_qos(topology.prefetch, BasicQosOptions::default())
        .await
        .map_err(|e| map_error("set prefetch", e))?;

    Ok(())
}
