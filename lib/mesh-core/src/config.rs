//! Registry timing configuration

use crate::{CoreError, Result};
use std::time::Duration;

/// Default TTL of a registry entry
pub const DEFAULT_REGISTRY_TTL: Duration = Duration::from_secs(10);

/// Timing shared by the registry store and the heartbeat publisher
#[derive(Clone, Debug, PartialEq)]
pub struct RegistryConfig {
    /// TTL applied to every registry write
    pub ttl: Duration,
    /// Interval between heartbeats
    pub heartbeat_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_REGISTRY_TTL)
    }
}

impl RegistryConfig {
    /// Config with the heartbeat running at half the TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            heartbeat_interval: ttl / 2,
        }
    }

    /// The heartbeat must land at least once inside every TTL window.
    pub fn validate(&self) -> Result<()> {
        if self.ttl < Duration::from_secs(1) {
            return Err(CoreError::InvalidConfiguration(format!(
                "registry TTL must be at least 1s, got {:?}",
                self.ttl
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(CoreError::InvalidConfiguration(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        if self.heartbeat_interval >= self.ttl {
            return Err(CoreError::InvalidConfiguration(format!(
                "heartbeat interval {:?} must be shorter than registry TTL {:?}",
                self.heartbeat_interval, self.ttl
            )));
        }
        Ok(())
    }
}
