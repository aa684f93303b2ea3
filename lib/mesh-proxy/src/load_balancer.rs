//! Instance selection across the live instances of one service

use mesh_core::ServiceRegistration;
use rand::Rng;

/// Picks one instance uniformly at random on every call, with no affinity
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadBalancer;

impl LoadBalancer {
    pub fn new() -> Self {
        Self
    }

    /// Select an instance from the list, or `None` when the list is empty
    pub fn select<'a>(
        &self,
        instances: &'a [ServiceRegistration],
    ) -> Option<&'a ServiceRegistration> {
        if instances.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..instances.len());
        instances.get(index)
    }
}
