//! Discovery-driven HTTP proxying and resilient service-to-service calls
pub mod discovery;
pub mod downstream;
pub mod error;
pub mod forwarder;
pub mod http;
pub mod load_balancer;
pub mod metrics;
pub mod middleware;
pub mod policy;
pub mod route_cache;
pub mod service_client;

#[cfg(test)]
mod testing;

pub use discovery::{DiscoveryResolver, Resolve};
pub use downstream::{
    DownstreamClient, DownstreamRequest, DownstreamResponse, ReqwestTransport, ResponseSource,
    Transport,
};
pub use error::{ProxyError, Result};
pub use forwarder::RequestForwarder;
pub use http::{HttpProxy, Proxied, PRINCIPAL_HEADER};
pub use load_balancer::LoadBalancer;
pub use metrics::{MetricsCollector, MetricsMiddleware};
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareContext, UNROUTED};
pub use policy::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState, Permit};
pub use route_cache::{CachedResolver, Resolved, RouteCache, RouteCacheConfig};
pub use service_client::ServiceClient;
