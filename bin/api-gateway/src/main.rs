use anyhow::{Context, Result};
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
    Request, Response,
};
use hyper_util::rt::tokio::TokioIo;
use mesh_core::init_logging;
use mesh_proxy::{
    CachedResolver, DiscoveryResolver, HttpProxy, LoggingMiddleware, MetricsCollector,
    MetricsMiddleware, MiddlewareChain, RequestForwarder,
};
use mesh_redis::{RedisClient, RedisRegistryStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

mod auth;
mod config;
mod gateway;
mod router;

use auth::JwtVerifier;
use config::Args;
use gateway::Gateway;
use router::Router;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_logging("info", args.log_format);

    info!("Starting api-gateway...");
    args.validate()?;

    let routing = args.routing()?;
    let router = Router::new(routing);
    info!("Routing to services: {}", router.services().join(", "));

    // The registry connection is lazy; a store that is down at boot yields 503s until it returns
    let store = match RedisRegistryStore::connect(&args.redis_url, args.registry_ttl()).await {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Registry store unreachable at boot, will retry per request");
            let client = RedisClient::new(&args.redis_url).context("invalid REDIS_URL")?;
            RedisRegistryStore::new(Arc::new(client), args.registry_ttl())
        }
    };
    info!("Service registry at {}", store.client().url());

    let resolver = Arc::new(CachedResolver::new(
        Arc::new(DiscoveryResolver::new(Arc::new(store))),
        &args.route_cache(),
    ));
    info!(
        ttl_ms = args.route_cache_ttl_ms,
        capacity = args.route_cache_capacity,
        "Route cache initialized"
    );

    let forwarder = RequestForwarder::new(args.connect_timeout());
    let proxy = HttpProxy::new(resolver, forwarder);

    let metrics = MetricsCollector::new().context("Failed to create metrics collector")?;
    let middleware = MiddlewareChain::new()
        .add(LoggingMiddleware)
        .add(MetricsMiddleware::new(metrics.clone()));
    info!("Middleware chain initialized with logging and metrics");

    let gateway = Arc::new(Gateway::new(
        router,
        JwtVerifier::new(&args.jwt_secret),
        proxy,
        middleware,
        metrics,
    ));

    let listener = TcpListener::bind(&args.listen).await?;
    info!("HTTP server listening on {}", args.listen);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let gateway = gateway.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let gateway = gateway.clone();
                handle_request(req, gateway)
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<Gateway>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    let response = gateway.handle(Request::from_parts(parts, body)).await;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Full::new(body)))
}
