//! Lazily established Redis connection shared by registry operations

use mesh_core::{redact_credentials, CoreError, Result};
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Upper bound on one connection attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// RedisClient owns the process-wide connection to the registry store.
///
/// The connection is opened on first use. Concurrent callers wait on the
/// same attempt, which is bounded by the connect timeout. After an error the
/// handle is cleared and the next caller reconnects instead of reusing it.
pub struct RedisClient {
    client: Client,
    url: String,
    connect_timeout: Duration,
    conn: Mutex<Option<ConnectionManager>>,
}

impl RedisClient {
    /// Create a client without connecting
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| CoreError::InvalidConfiguration(format!("invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            url: redact_credentials(url),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            conn: Mutex::new(None),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Redacted URL, safe to log
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether a connection is currently held
    pub async fn is_ready(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Get the shared connection, connecting if none is held
    pub async fn connection(&self) -> Result<ConnectionManager> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let connecting = ConnectionManager::new(self.client.clone());
        let conn = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(CoreError::Store(format!(
                    "failed to connect to {}: {}",
                    self.url, e
                )))
            }
            Err(_) => {
                return Err(CoreError::Store(format!(
                    "timed out after {:?} connecting to {}",
                    self.connect_timeout, self.url
                )))
            }
        };

        info!(url = %self.url, "Connected to Redis registry");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the held connection after a failure
    pub async fn invalidate(&self) {
        let mut guard = self.conn.lock().await;
        if guard.take().is_some() {
            warn!(url = %self.url, "Dropped Redis connection after error");
        }
    }
}
