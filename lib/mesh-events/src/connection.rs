//! Per-process broker connection handle
//!
//! One connection and channel per process, created on first use. A channel
//! found closed is dropped and re-acquired instead of being reused.
//! Concurrent callers share one connection attempt, bounded by the connect
//! timeout.

use crate::{amqp, Broker, EventError, ExchangeSpec, Result};
use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use mesh_core::redact_credentials;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Upper bound on one connection attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct Session {
    // Held so the connection outlives its channel
    _connection: Connection,
    channel: Channel,
}

impl Session {
    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}

pub struct AmqpConnector {
    url: String,
    connect_timeout: Duration,
    session: Mutex<Option<Session>>,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session: Mutex::new(None),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Broker URL with credentials masked
    pub fn url(&self) -> String {
        redact_credentials(&self.url)
    }

    /// Establish the channel now; used at boot where failure is fatal
    pub async fn connect(&self) -> Result<()> {
        self.channel().await.map(|_| ())
    }

    /// The live channel, connecting or reconnecting as needed
    pub async fn channel(&self) -> Result<Channel> {
        let mut session = self.session.lock().await;

        if let Some(existing) = session.as_ref() {
            if existing.is_open() {
                return Ok(existing.channel.clone());
            }
            warn!(url = %self.url(), "Broker channel closed, reconnecting");
            *session = None;
        }

        let connecting = Connection::connect(&self.url, ConnectionProperties::default());
        let connection = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(result) => result
                .map_err(|e| EventError::Connection(format!("connect to {}: {}", self.url(), e)))?,
            Err(_) => {
                return Err(EventError::Connection(format!(
                    "timed out after {:?} connecting to {}",
                    self.connect_timeout,
                    self.url()
                )))
            }
        };
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| amqp::map_error("create channel", e))?;

        info!(url = %self.url(), "Connected to broker");

        *session = Some(Session {
            _connection: connection,
            channel: channel.clone(),
        });
        Ok(channel)
    }

    /// The established channel without connecting.
    ///
    /// `NotReady` before the first connection, `Connection` once it was lost.
    pub async fn current(&self) -> Result<Channel> {
        match self.session.lock().await.as_ref() {
            None => Err(EventError::NotReady),
            Some(session) if session.is_open() => Ok(session.channel.clone()),
            Some(_) => Err(EventError::Connection("channel closed".to_string())),
        }
    }

    /// Forget the current channel so the next use reconnects
    pub async fn invalidate(&self) {
        if self.session.lock().await.take().is_some() {
            warn!(url = %self.url(), "Broker channel invalidated");
        }
    }

    async fn invalidate_on(&self, err: EventError) -> EventError {
        if err.is_connection_loss() {
            self.invalidate().await;
        }
        err
    }
}

#[async_trait]
impl Broker for AmqpConnector {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()> {
        let channel = self.channel().await?;
        match amqp::declare_exchange(&channel, spec).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.invalidate_on(e).await),
        }
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<bool> {
        let channel = self.channel().await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent

        match channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
        {
            Ok(_confirm) => Ok(true),
            Err(e) => {
                let err = EventError::Publish(format!("{} to {}: {}", routing_key, exchange, e));
                self.invalidate().await;
                Err(err)
            }
        }
    }
}
