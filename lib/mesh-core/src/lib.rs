//! Core service registry functionality
//!
//! This library provides:
//! - Service registrations and the `services:<name>:<host>:<port>` key layout
//! - The `RegistryStore` capability and an in-memory TTL store
//! - The heartbeat publisher that keeps an instance registered

pub mod config;
pub mod endpoint;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod redact;
pub mod registration;
pub mod registry;

pub use config::RegistryConfig;
pub use endpoint::Endpoint;
pub use error::{CoreError, Result};
pub use heartbeat::{HeartbeatHandle, HeartbeatPublisher, HeartbeatStats};
pub use logging::{init_logging, LogFormat};
pub use redact::redact_credentials;
pub use registration::{RegistrationRecord, ServiceRegistration};
pub use registry::{InMemoryRegistryStore, RegistryStore};
