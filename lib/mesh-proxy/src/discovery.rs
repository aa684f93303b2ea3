//! Discovery resolver selecting one live instance of a named service

use crate::{LoadBalancer, ProxyError, Result};
use async_trait::async_trait;
use mesh_core::{Endpoint, RegistryStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolution capability held by callers that pick a target per request
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Address of one live instance, or `NoLiveInstance`
    async fn resolve(&self, service_name: &str) -> Result<Endpoint>;
}

/// DiscoveryResolver lists live instances from the registry store on every
/// call and lets the load balancer pick one.
pub struct DiscoveryResolver {
    store: Arc<dyn RegistryStore>,
    balancer: LoadBalancer,
}

impl DiscoveryResolver {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            balancer: LoadBalancer::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }
}

#[async_trait]
impl Resolve for DiscoveryResolver {
    async fn resolve(&self, service_name: &str) -> Result<Endpoint> {
        let instances = self.store.lookup_all(service_name).await?;

        let Some(selected) = self.balancer.select(&instances) else {
            warn!(service = %service_name, "No live instance registered");
            return Err(ProxyError::NoLiveInstance(service_name.to_string()));
        };

        debug!(
            service = %service_name,
            candidates = instances.len(),
            selected = %selected.endpoint(),
            "Resolved service"
        );
        Ok(selected.endpoint())
    }
}
