//! Registry store on top of Redis keys with expiry

use crate::RedisClient;
use async_trait::async_trait;
use mesh_core::registration::{self, service_pattern, ServiceRegistration};
use mesh_core::{CoreError, RegistryStore, Result};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Keys scanned per SCAN round trip
const SCAN_COUNT: usize = 100;

/// RedisRegistryStore writes `services:<name>:<host>:<port>` keys with SETEX
/// and lists them with SCAN, letting Redis expire stale instances.
pub struct RedisRegistryStore {
    client: Arc<RedisClient>,
    ttl: Duration,
}

impl RedisRegistryStore {
    pub fn new(client: Arc<RedisClient>, ttl: Duration) -> Self {
        Self { client, ttl }
    }

    /// Connect eagerly, used by processes that want to report the store at boot
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self> {
        let client = Arc::new(RedisClient::new(url)?);
        client.connection().await?;
        Ok(Self::new(client, ttl))
    }

    pub fn client(&self) -> &Arc<RedisClient> {
        &self.client
    }

    async fn store_error(&self, op: &str, e: redis::RedisError) -> CoreError {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            self.client.invalidate().await;
        }
        CoreError::Store(format!("{} failed: {}", op, e))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.client.connection().await?;
        let mut cursor = 0u64;
        let mut keys = Vec::new();

        loop {
            let scanned: std::result::Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await;

            let (next_cursor, batch) = match scanned {
                Ok(result) => result,
                Err(e) => return Err(self.store_error("SCAN", e).await),
            };

            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl RegistryStore for RedisRegistryStore {
    async fn register(&self, service_name: &str, host: &str, port: u16) -> Result<()> {
        registration::validate(service_name, host, port)?;

        let registration = ServiceRegistration::new(service_name, host, port);
        let key = registration.key();
        let value = registration.to_json()?;

        let mut conn = self.client.connection().await?;
        let written: std::result::Result<(), _> =
            conn.set_ex(&key, value, self.ttl.as_secs().max(1)).await;
        if let Err(e) = written {
            return Err(self.store_error("SETEX", e).await);
        }

        debug!(key = %key, ttl_secs = self.ttl.as_secs(), "Registered instance in Redis");
        Ok(())
    }

    async fn lookup_all(&self, service_name: &str) -> Result<Vec<ServiceRegistration>> {
        let keys = self.scan_keys(&service_pattern(service_name)).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.client.connection().await?;
        let values: std::result::Result<Vec<Option<String>>, _> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await;
        let values = match values {
            Ok(values) => values,
            Err(e) => return Err(self.store_error("MGET", e).await),
        };

        let mut registrations = Vec::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values) {
            // Expired between SCAN and MGET
            let Some(value) = value else { continue };

            match ServiceRegistration::from_json(service_name, &value) {
                Ok(registration) => registrations.push(registration),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable registry entry"),
            }
        }

        debug!(
            service = %service_name,
            instances = registrations.len(),
            "Looked up live instances"
        );
        Ok(registrations)
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
