//! Short-lived local cache of resolved routes
//!
//! The cache is owned by the gateway and is independent of the registry TTL.
//! A hit never touches the registry store; an expired entry is treated as a
//! miss and re-resolved.

use crate::{ProxyError, Resolve, Result};
use async_trait::async_trait;
use lru::LruCache;
use mesh_core::Endpoint;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Route cache configuration
#[derive(Clone, Debug, PartialEq)]
pub struct RouteCacheConfig {
    /// How long a resolved route may be served without re-resolving
    pub ttl: Duration,
    /// Maximum number of cached service names
    pub capacity: usize,
}

impl Default for RouteCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            capacity: 256,
        }
    }
}

impl RouteCacheConfig {
    /// Cached routes must go stale before the registry entry behind them can.
    pub fn validate(&self, registry_ttl: Duration) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(ProxyError::InvalidConfiguration(
                "route cache TTL must be non-zero".to_string(),
            ));
        }
        if self.ttl >= registry_ttl {
            return Err(ProxyError::InvalidConfiguration(format!(
                "route cache TTL {:?} must be shorter than registry TTL {:?}",
                self.ttl, registry_ttl
            )));
        }
        if self.capacity == 0 {
            return Err(ProxyError::InvalidConfiguration(
                "route cache capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct RouteCacheEntry {
    endpoint: Endpoint,
    expires_at: Instant,
}

/// Service name to resolved address, each entry with its own expiry
pub struct RouteCache {
    ttl: Duration,
    entries: Mutex<LruCache<String, RouteCacheEntry>>,
}

impl RouteCache {
    pub fn new(config: &RouteCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl: config.ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached address for `service_name`, dropping it if expired
    pub fn get(&self, service_name: &str) -> Option<Endpoint> {
        let mut entries = self.entries.lock().ok()?;
        let now = Instant::now();

        let cached = entries
            .get(service_name)
            .map(|entry| (entry.expires_at > now, entry.endpoint.clone()));

        match cached {
            Some((true, endpoint)) => Some(endpoint),
            Some((false, _)) => {
                entries.pop(service_name);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, service_name: &str, endpoint: Endpoint) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(
                service_name.to_string(),
                RouteCacheEntry {
                    endpoint,
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
    }

    /// Forget the route for `service_name`
    pub fn invalidate(&self, service_name: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.pop(service_name);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a cached resolution
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub endpoint: Endpoint,
    pub from_cache: bool,
}

/// Resolver that consults the route cache before the wrapped resolver
pub struct CachedResolver {
    inner: Arc<dyn Resolve>,
    cache: RouteCache,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn Resolve>, config: &RouteCacheConfig) -> Self {
        Self {
            inner,
            cache: RouteCache::new(config),
        }
    }

    pub fn cache(&self) -> &RouteCache {
        &self.cache
    }

    /// Resolve, reporting whether the cache answered
    pub async fn lookup(&self, service_name: &str) -> Result<Resolved> {
        if let Some(endpoint) = self.cache.get(service_name) {
            debug!(service = %service_name, endpoint = %endpoint, "Route cache hit");
            return Ok(Resolved {
                endpoint,
                from_cache: true,
            });
        }

        let endpoint = self.inner.resolve(service_name).await?;
        self.cache.insert(service_name, endpoint.clone());
        debug!(service = %service_name, endpoint = %endpoint, "Route cache miss, resolved");

        Ok(Resolved {
            endpoint,
            from_cache: false,
        })
    }

    /// Drop a route that just failed so the next request re-resolves
    pub fn invalidate(&self, service_name: &str) {
        self.cache.invalidate(service_name);
    }
}

#[async_trait]
impl Resolve for CachedResolver {
    async fn resolve(&self, service_name: &str) -> Result<Endpoint> {
        Ok(self.lookup(service_name).await?.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver returning a new port on every call and counting calls
    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Resolve for CountingResolver {
        async fn resolve(&self, service_name: &str) -> Result<Endpoint> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if service_name == "missing" {
                return Err(ProxyError::NoLiveInstance(service_name.to_string()));
            }
            Ok(Endpoint::new("10.0.0.1", 4000 + call as u16))
        }
    }

    fn resolver() -> (Arc<CountingResolver>, CachedResolver) {
        let inner = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedResolver::new(inner.clone(), &RouteCacheConfig::default());
        (inner, cached)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_does_not_requery() {
        let (inner, cached) = resolver();

        let first = cached.lookup("list-service").await.unwrap();
        let second = cached.lookup("list-service").await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.endpoint, second.endpoint);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_serves_route_older_than_ttl() {
        let (inner, cached) = resolver();
        let ttl = cached.cache().ttl();

        let first = cached.lookup("list-service").await.unwrap();

        tokio::time::advance(ttl - Duration::from_millis(1)).await;
        assert!(cached.lookup("list-service").await.unwrap().from_cache);

        tokio::time::advance(Duration::from_millis(1)).await;
        let refreshed = cached.lookup("list-service").await.unwrap();
        assert!(!refreshed.from_cache);
        assert_ne!(refreshed.endpoint, first.endpoint);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let (inner, cached) = resolver();

        assert!(cached.lookup("missing").await.is_err());
        assert!(cached.lookup("missing").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(cached.cache().is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_forces_resolution() {
        let (inner, cached) = resolver();

        cached.lookup("order-service").await.unwrap();
        cached.invalidate("order-service");
        assert!(!cached.lookup("order-service").await.unwrap().from_cache);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_config_must_undercut_registry_ttl() {
        let registry_ttl = Duration::from_secs(10);
        assert!(RouteCacheConfig::default().validate(registry_ttl).is_ok());

        let too_long = RouteCacheConfig {
            ttl: Duration::from_secs(30),
            capacity: 16,
        };
        assert!(too_long.validate(registry_ttl).is_err());

        let zero = RouteCacheConfig {
            ttl: Duration::ZERO,
            capacity: 16,
        };
        assert!(zero.validate(registry_ttl).is_err());
    }

    #[test]
    fn test_lru_capacity_bound() {
        let cache = RouteCache::new(&RouteCacheConfig {
            ttl: Duration::from_secs(5),
            capacity: 2,
        });
        cache.insert("a", Endpoint::new("h", 1));
        cache.insert("b", Endpoint::new("h", 2));
        cache.insert("c", Endpoint::new("h", 3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("c"), Some(Endpoint::new("h", 3)));
    }
}
