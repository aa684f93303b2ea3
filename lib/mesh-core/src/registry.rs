//! Registry store capability and an in-memory TTL implementation

use crate::registration::{self, ServiceRegistration};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// A TTL-capable store holding one entry per live service instance.
///
/// Entries are only visible while their TTL has not elapsed; every call to
/// `register` resets the TTL of that instance.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Write or refresh the entry for `(service_name, host, port)`
    async fn register(&self, service_name: &str, host: &str, port: u16) -> Result<()>;

    /// All currently non-expired entries for `service_name`
    async fn lookup_all(&self, service_name: &str) -> Result<Vec<ServiceRegistration>>;

    /// TTL applied on every write
    fn ttl(&self) -> Duration;
}

#[derive(Clone, Debug)]
struct StoredEntry {
    registration: ServiceRegistration,
    expires_at: Instant,
}

/// In-process registry store.
///
/// Expiry follows `tokio::time`, so tests can pause and advance the clock.
pub struct InMemoryRegistryStore {
    // Map of registry key to entry
    entries: Arc<RwLock<HashMap<String, StoredEntry>>>,
    ttl: Duration,
}

impl InMemoryRegistryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Purged {} expired registrations", removed);
        }
        removed
    }

    /// Count of live entries across all services
    pub async fn live_count(&self) -> usize {
        self.purge_expired().await;
        self.entries.read().await.len()
    }
}

impl Clone for InMemoryRegistryStore {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            ttl: self.ttl,
        }
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn register(&self, service_name: &str, host: &str, port: u16) -> Result<()> {
        registration::validate(service_name, host, port)?;

        let registration = ServiceRegistration::new(service_name, host, port);
        let key = registration.key();

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.clone(),
            StoredEntry {
                registration,
                expires_at: now + self.ttl,
            },
        );

        debug!("Registered {} (ttl {:?})", key, self.ttl);
        Ok(())
    }

    async fn lookup_all(&self, service_name: &str) -> Result<Vec<ServiceRegistration>> {
        let prefix = format!("{}:{}:", registration::KEY_PREFIX, service_name);
        let entries = self.entries.read().await;
        let now = Instant::now();

        let mut found: Vec<(&String, &StoredEntry)> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(&prefix) && entry.expires_at > now)
            .collect();
        found.sort_by(|a, b| a.0.cmp(b.0));

        Ok(found
            .into_iter()
            .map(|(_, entry)| entry.registration.clone())
            .collect())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
