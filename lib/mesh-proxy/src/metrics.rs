//! Prometheus metrics for the gateway

use crate::middleware::{Middleware, MiddlewareContext};
use anyhow::Result;
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::debug;

/// Prometheus metrics collector for gateway traffic
#[derive(Clone)]
pub struct MetricsCollector {
    /// Requests received, by method and routed service
    pub requests_total: CounterVec,
    /// Request latency in seconds, by method and routed service
    pub request_duration_seconds: HistogramVec,
    /// Responses by status code
    pub responses_total: CounterVec,
    /// Requests that ended in an error
    pub errors_total: Counter,
    /// Route cache lookups, by hit or miss
    pub route_cache_total: CounterVec,
    /// Resolutions that found no live instance, by service
    pub resolution_failures_total: CounterVec,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = CounterVec::new(
            Opts::new("gateway_requests_total", "Total requests received by the gateway"),
            &["method", "service"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Gateway request latency in seconds",
            ),
            &["method", "service"],
        )?;

        let responses_total = CounterVec::new(
            Opts::new("gateway_responses_total", "Total gateway responses by status"),
            &["status"],
        )?;

        let errors_total = Counter::new("gateway_errors_total", "Total gateway errors")?;

        let route_cache_total = CounterVec::new(
            Opts::new("gateway_route_cache_total", "Route cache lookups by result"),
            &["result"],
        )?;

        let resolution_failures_total = CounterVec::new(
            Opts::new(
                "gateway_resolution_failures_total",
                "Resolutions that found no live instance",
            ),
            &["service"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(responses_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(route_cache_total.clone()))?;
        registry.register(Box::new(resolution_failures_total.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            responses_total,
            errors_total,
            route_cache_total,
            resolution_failures_total,
            registry,
        })
    }

    pub fn record_route_cache(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.route_cache_total.with_label_values(&[result]).inc();
    }

    pub fn record_resolution_failure(&self, service: &str) {
        self.resolution_failures_total
            .with_label_values(&[service])
            .inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Prometheus metrics middleware
pub struct MetricsMiddleware {
    pub collector: MetricsCollector,
}

impl MetricsMiddleware {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }
}

#[async_trait::async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "MetricsMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        self.collector
            .requests_total
            .with_label_values(&[context.method.as_str(), context.service_label()])
            .inc();
        Ok(())
    }

    async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        debug!(
            method = %context.method,
            service = %context.service_label(),
            status,
            "Recording response metrics"
        );

        self.collector
            .responses_total
            .with_label_values(&[status.to_string().as_str()])
            .inc();
        self.collector
            .request_duration_seconds
            .with_label_values(&[context.method.as_str(), context.service_label()])
            .observe(context.elapsed_secs());

        Ok(())
    }

    async fn on_error(&self, _context: &MiddlewareContext, _error: &str) -> Result<()> {
        self.collector.errors_total.inc();
        Ok(())
    }
}
