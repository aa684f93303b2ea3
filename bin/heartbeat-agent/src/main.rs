use anyhow::{Context, Result};
use clap::Parser;
use mesh_core::{init_logging, HeartbeatPublisher, LogFormat, RegistryConfig};
use mesh_redis::{RedisClient, RedisRegistryStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Keeps one service instance registered in the Redis registry
#[derive(Parser, Debug, Clone)]
#[command(name = "heartbeat-agent")]
struct Args {
    /// Logical service name, e.g. `product-service`
    #[arg(long, env = "SERVICE_NAME")]
    service_name: String,

    /// Host other processes reach the instance on
    #[arg(long, env = "SERVICE_HOST")]
    host: String,

    #[arg(long, env = "SERVICE_PORT")]
    port: u16,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Registry entry TTL in seconds; heartbeats run at half of it
    #[arg(long, env = "REGISTRY_TTL_SECS", default_value = "10")]
    registry_ttl_secs: u64,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

impl Args {
    fn registry(&self) -> RegistryConfig {
        RegistryConfig::with_ttl(Duration::from_secs(self.registry_ttl_secs))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_logging("info", args.log_format);

    info!("Starting heartbeat-agent...");

    let registry = args.registry();
    registry.validate()?;

    let client = Arc::new(RedisClient::new(&args.redis_url).context("invalid REDIS_URL")?);
    if let Err(e) = client.connection().await {
        // Heartbeats keep retrying on every tick
        warn!(url = %client.url(), error = %e, "Registry store unreachable at boot");
    }
    let store = Arc::new(RedisRegistryStore::new(client, registry.ttl));

    let publisher = HeartbeatPublisher::new(
        store,
        args.service_name.as_str(),
        args.host.as_str(),
        args.port,
        &registry,
    )?;
    let handle = publisher.spawn();

    tokio::signal::ctrl_c().await?;
    info!(
        service = %args.service_name,
        heartbeats = handle.stats().successes(),
        failures = handle.stats().failures(),
        "Shutting down, registry entry will expire"
    );
    handle.stop();
    Ok(())
}
