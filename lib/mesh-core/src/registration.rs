//! Service registrations and their key/value layout in the registry store
//!
//! Each live instance owns one key, `services:<serviceName>:<host>:<port>`,
//! whose value is the JSON record `{host, port, timestamp}` with the
//! timestamp in Unix milliseconds.

use crate::{CoreError, Endpoint, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Namespace shared by every registry key
pub const KEY_PREFIX: &str = "services";

/// A live service instance as seen through the registry
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceRegistration {
    pub service_name: String,
    pub host: String,
    pub port: u16,
    /// Time of the most recent heartbeat write for this instance
    pub registered_at: DateTime<Utc>,
}

/// Value stored under a registry key
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub host: String,
    pub port: u16,
    pub timestamp: i64,
}

impl ServiceRegistration {
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            host: host.into(),
            port,
            registered_at: Utc::now(),
        }
    }

    /// Registry key for this instance
    pub fn key(&self) -> String {
        registry_key(&self.service_name, &self.host, self.port)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn to_record(&self) -> RegistrationRecord {
        RegistrationRecord {
            host: self.host.clone(),
            port: self.port,
            timestamp: self.registered_at.timestamp_millis(),
        }
    }

    /// Rebuild a registration from a stored record
    pub fn from_record(service_name: &str, record: RegistrationRecord) -> Self {
        let registered_at = Utc
            .timestamp_millis_opt(record.timestamp)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            service_name: service_name.to_string(),
            host: record.host,
            port: record.port,
            registered_at,
        }
    }

    /// Serialize the stored value for this registration
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_record())?)
    }

    pub fn from_json(service_name: &str, value: &str) -> Result<Self> {
        let record: RegistrationRecord = serde_json::from_str(value)?;
        Ok(Self::from_record(service_name, record))
    }
}

/// Build the key for `(service_name, host, port)`
pub fn registry_key(service_name: &str, host: &str, port: u16) -> String {
    format!("{}:{}:{}:{}", KEY_PREFIX, service_name, host, port)
}

/// Glob pattern matching every instance key of a service
pub fn service_pattern(service_name: &str) -> String {
    format!("{}:{}:*", KEY_PREFIX, service_name)
}

/// Reject identifiers that would break the key layout.
///
/// A `:` inside a service name would make `services:<a>:*` also match the
/// keys of a service called `<a>:<b>`.
pub fn validate(service_name: &str, host: &str, port: u16) -> Result<()> {
    if service_name.is_empty() {
        return Err(CoreError::InvalidRegistration(
            "service name must not be empty".to_string(),
        ));
    }
    if service_name.contains(':') || service_name.contains('*') {
        return Err(CoreError::InvalidRegistration(format!(
            "service name '{}' must not contain ':' or '*'",
            service_name
        )));
    }
    if host.is_empty() {
        return Err(CoreError::InvalidRegistration(format!(
            "host for '{}' must not be empty",
            service_name
        )));
    }
    if port == 0 {
        return Err(CoreError::InvalidRegistration(format!(
            "port for '{}' must be non-zero",
            service_name
        )));
    }
    Ok(())
}
