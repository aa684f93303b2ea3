//! Gateway configuration
//!
//! Flags are also read from the environment; a `.env` file is loaded first
//! when present.

use anyhow::{bail, Context, Result};
use clap::Parser;
use mesh_core::LogFormat;
use mesh_proxy::RouteCacheConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// API gateway routing requests to services found in the registry
#[derive(Parser, Debug, Clone)]
#[command(name = "api-gateway")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "GATEWAY_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Redis URL of the service registry
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Secret verifying HS256 bearer tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Registry entry TTL in seconds; the route cache must expire sooner
    #[arg(long, env = "REGISTRY_TTL_SECS", default_value = "10")]
    pub registry_ttl_secs: u64,

    /// How long a resolved route is reused, in milliseconds
    #[arg(long, env = "ROUTE_CACHE_TTL_MS", default_value = "5000")]
    pub route_cache_ttl_ms: u64,

    /// Maximum number of cached routes
    #[arg(long, env = "ROUTE_CACHE_CAPACITY", default_value = "256")]
    pub route_cache_capacity: usize,

    /// Connect timeout towards backends, in milliseconds
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "2000")]
    pub connect_timeout_ms: u64,

    /// YAML file replacing the built-in route table and public paths
    #[arg(long, env = "ROUTES_FILE")]
    pub routes_file: Option<PathBuf>,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

impl Args {
    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn route_cache(&self) -> RouteCacheConfig {
        RouteCacheConfig {
            ttl: Duration::from_millis(self.route_cache_ttl_ms),
            capacity: self.route_cache_capacity,
        }
    }

    /// Route table from `--routes-file`, or the built-in one
    pub fn routing(&self) -> Result<RoutingConfig> {
        let routing = match &self.routes_file {
            Some(path) => RoutingConfig::from_file(path)?,
            None => RoutingConfig::default(),
        };
        routing.validate()?;
        Ok(routing)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.is_empty() {
            bail!("JWT_SECRET must not be empty");
        }
        self.route_cache()
            .validate(self.registry_ttl())
            .context("invalid route cache configuration")?;
        Ok(())
    }
}

/// One path prefix served by one logical service
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RouteConfig {
    pub prefix: String,
    pub service: String,
    /// Replacement for `prefix` in the forwarded path
    #[serde(default)]
    pub rewrite: Option<String>,
}

impl RouteConfig {
    pub fn new(prefix: &str, service: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            service: service.to_string(),
            rewrite: None,
        }
    }

    pub fn with_rewrite(mut self, rewrite: &str) -> Self {
        self.rewrite = Some(rewrite.to_string());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RoutingConfig {
    pub routes: Vec<RouteConfig>,
    /// Paths reachable without a bearer token
    #[serde(default)]
    pub public_paths: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            routes: vec![
                RouteConfig::new("/users", "user-service"),
                RouteConfig::new("/products", "product-service"),
                RouteConfig::new("/orders", "order-service"),
                RouteConfig::new("/lists", "list-service").with_rewrite("/list"),
            ],
            // `/lists` requires a token so checkout always carries a user
            // id. List `/lists` here to serve list views anonymously.
            public_paths: vec![
                "/users/login".to_string(),
                "/users/register".to_string(),
                "/health".to_string(),
            ],
        }
    }
}

impl RoutingConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("parsing route table")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading route table {}", path.display()))?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.routes.is_empty() {
            bail!("route table is empty");
        }
        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                bail!("route prefix {} must start with '/'", route.prefix);
            }
            if route.service.is_empty() {
                bail!("route {} has no service", route.prefix);
            }
        }
        Ok(())
    }
}
