//! Middleware hooks around proxied requests

use anyhow::Result;
use hyper::Request;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, span, warn, Instrument, Level};

/// Service label used before a route has been matched
pub const UNROUTED: &str = "none";

/// Per-request state shared by every middleware hook
#[derive(Clone)]
pub struct MiddlewareContext {
    /// Request path as received by the gateway
    pub path: String,
    /// Request method
    pub method: String,
    /// Logical service the request was routed to
    pub service: Option<String>,
    /// Headers with UTF-8 values, names lowercased
    pub request_headers: HashMap<String, String>,
    /// When the gateway started handling the request
    pub started_at: Instant,
    /// Values middleware hand to each other
    pub metadata: Arc<Mutex<HashMap<String, String>>>,
}

impl MiddlewareContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            service: None,
            request_headers: HashMap::new(),
            started_at: Instant::now(),
            metadata: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_request<B>(req: &Request<B>) -> Self {
        let mut context = Self::new(req.method().as_str(), req.uri().path());
        context.request_headers = req
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
            .collect();
        context
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Service label for logs and metrics
    pub fn service_label(&self) -> &str {
        self.service.as_deref().unwrap_or(UNROUTED)
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.metadata.lock().ok().and_then(|m| m.get(key).cloned())
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut metadata) = self.metadata.lock() {
            metadata.insert(key.into(), value.into());
        }
    }
}

/// Hooks run around every routed request. All hooks default to no-ops.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str {
        "UnnamedMiddleware"
    }

    /// Called before the request is proxied
    async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
        Ok(())
    }

    /// Called once the response status is known
    async fn on_response(&self, _context: &MiddlewareContext, _status: u16) -> Result<()> {
        Ok(())
    }

    /// Called when proxying failed, before the error response is sent
    async fn on_error(&self, _context: &MiddlewareContext, _error: &str) -> Result<()> {
        Ok(())
    }
}

/// Ordered middleware; responses unwind in reverse
#[derive(Clone)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn add<M: Middleware + 'static>(mut self, layer: M) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn span_for(layer: &dyn Middleware) -> tracing::Span {
        span!(Level::DEBUG, "middleware", name = layer.name())
    }

    pub async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        for layer in &self.layers {
            let span = Self::span_for(layer.as_ref());
            layer.on_request(context).instrument(span).await?;
        }
        Ok(())
    }

    pub async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        for layer in self.layers.iter().rev() {
            let span = Self::span_for(layer.as_ref());
            layer.on_response(context, status).instrument(span).await?;
        }
        Ok(())
    }

    pub async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        for layer in &self.layers {
            let span = Self::span_for(layer.as_ref());
            layer.on_error(context, error).instrument(span).await?;
        }
        Ok(())
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Access log for proxied requests
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        debug!(
            method = %context.method,
            path = %context.path,
            service = %context.service_label(),
            headers = context.request_headers.len(),
            "Request received"
        );
        Ok(())
    }

    async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        info!(
            method = %context.method,
            path = %context.path,
            service = %context.service_label(),
            status,
            duration_ms = context.started_at.elapsed().as_millis() as u64,
            "Request completed"
        );
        Ok(())
    }

    async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        warn!(
            method = %context.method,
            path = %context.path,
            service = %context.service_label(),
            error,
            "Request failed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_context_from_request() {
        let req = Request::builder()
            .method("POST")
            .uri("/lists/7/checkout?x=1")
            .header("authorization", "Bearer abc")
            .body(())
            .unwrap();

        let context = MiddlewareContext::from_request(&req);
        assert_eq!(context.method, "POST");
        assert_eq!(context.path, "/lists/7/checkout");
        assert_eq!(context.request_headers.get("authorization").unwrap(), "Bearer abc");
        assert_eq!(context.service_label(), UNROUTED);

        let routed = context.with_service("list-service");
        assert_eq!(routed.service_label(), "list-service");
    }

    #[test]
    fn test_context_metadata() {
        let context = MiddlewareContext::new("GET", "/users");
        context.set_metadata("key1", "value1");
        assert_eq!(context.get_metadata("key1"), Some("value1".to_string()));
        assert_eq!(context.get_metadata("key2"), None);
    }

    struct Recorder {
        id: usize,
        order: Arc<Mutex<Vec<String>>>,
        errors: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Middleware for Recorder {
        async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
            self.order.lock().unwrap().push(format!("req{}", self.id));
            Ok(())
        }

        async fn on_response(&self, _context: &MiddlewareContext, _status: u16) -> Result<()> {
            self.order.lock().unwrap().push(format!("resp{}", self.id));
            Ok(())
        }

        async fn on_error(&self, _context: &MiddlewareContext, _error: &str) -> Result<()> {
            self.errors.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_chain_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(AtomicUsize::new(0));
        let chain = MiddlewareChain::new()
            .add(Recorder {
                id: 1,
                order: order.clone(),
                errors: errors.clone(),
            })
            .add(Recorder {
                id: 2,
                order: order.clone(),
                errors: errors.clone(),
            });
        assert_eq!(chain.len(), 2);

        let context = MiddlewareContext::new("GET", "/products");
        chain.on_request(&context).await.unwrap();
        chain.on_response(&context, 200).await.unwrap();
        chain.on_error(&context, "boom").await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["req1", "req2", "resp2", "resp1"]);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_logging_middleware() {
        let context = MiddlewareContext::new("GET", "/users").with_service("user-service");
        assert!(LoggingMiddleware.on_request(&context).await.is_ok());
        assert!(LoggingMiddleware.on_response(&context, 200).await.is_ok());
        assert!(LoggingMiddleware.on_error(&context, "x").await.is_ok());
    }
}
