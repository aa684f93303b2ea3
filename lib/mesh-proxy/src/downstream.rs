//! Breaker-wrapped HTTP calls between services
//!
//! Every call goes through the breaker of its target and is bounded by the
//! breaker's call timeout. While the breaker is open the caller receives a
//! synthesized fallback response, marked as such, and no request is sent.

use crate::{BreakerRegistry, CircuitBreakerConfig, ProxyError, Result};
use async_trait::async_trait;
use hyper::body::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// An outbound call: method, URL and optional JSON body
#[derive(Clone, Debug)]
pub struct DownstreamRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
}

impl DownstreamRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Where a response came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseSource {
    /// Answered by the downstream service
    Live,
    /// Synthesized because the circuit is open
    Fallback,
}

#[derive(Clone, Debug)]
pub struct DownstreamResponse {
    pub status: u16,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl DownstreamResponse {
    pub fn live(status: u16, body: Bytes) -> Self {
        Self {
            status,
            body,
            source: ResponseSource::Live,
        }
    }

    /// Unavailable answer served while the breaker of `target` is open
    pub fn fallback(target: &str) -> Self {
        let body = serde_json::json!({
            "error": format!("{} temporarily unavailable; circuit is open", target),
        });
        Self {
            status: 503,
            body: Bytes::from(body.to_string()),
            source: ResponseSource::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ResponseSource::Fallback
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Error message carried by a JSON `{"error": ...}` body
    pub fn error_message(&self) -> Option<String> {
        serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
    }
}

/// Network seam under the downstream client
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &DownstreamRequest) -> Result<DownstreamResponse>;
}

/// Transport backed by a pooled reqwest client
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &DownstreamRequest) -> Result<DownstreamResponse> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let transport_error = |e: reqwest::Error| ProxyError::Transport {
            target: request.url.clone(),
            reason: e.to_string(),
        };

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport_error)?;

        Ok(DownstreamResponse::live(status, body))
    }
}

/// Client making breaker-guarded calls, one breaker per target name
pub struct DownstreamClient {
    transport: Arc<dyn Transport>,
    breakers: BreakerRegistry,
}

impl DownstreamClient {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_transport(Arc::new(ReqwestTransport::new()), config)
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: CircuitBreakerConfig) -> Self {
        Self {
            transport,
            breakers: BreakerRegistry::new(config),
        }
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Call `target` through its breaker.
    ///
    /// Timeouts and transport errors are returned as errors and counted
    /// against the breaker; 5xx answers are returned as-is and also counted.
    pub async fn call(
        &self,
        target: &str,
        request: DownstreamRequest,
    ) -> Result<DownstreamResponse> {
        let breaker = self.breakers.get(target);

        let Some(permit) = breaker.try_acquire() else {
            error!(target_service = %target, "Fallback served, circuit is open");
            return Ok(DownstreamResponse::fallback(target));
        };

        let call_timeout = breaker.config().call_timeout;
        debug!(
            target_service = %target,
            method = %request.method,
            url = %request.url,
            ?permit,
            "Calling downstream"
        );

        let sent = tokio::time::timeout(call_timeout, self.transport.send(&request)).await;
        let outcome = match sent {
            Ok(result) => result,
            Err(_) => Err(ProxyError::Timeout {
                target: target.to_string(),
                timeout_ms: call_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(response) if response.status >= 500 => {
                warn!(
                    target_service = %target,
                    status = response.status,
                    "Downstream server error"
                );
                breaker.record_failure(permit);
                Ok(response)
            }
            Ok(response) => {
                breaker.record_success(permit);
                Ok(response)
            }
            Err(e) => {
                warn!(target_service = %target, error = %e, "Downstream call failed");
                if e.is_breaker_failure() {
                    breaker.record_failure(permit);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CircuitState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behavior {
        Hang,
        Refuse,
        Status(u16),
    }

    struct MockTransport {
        attempts: AtomicUsize,
        behavior: Mutex<Behavior>,
    }

    impl MockTransport {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicUsize::new(0),
                behavior: Mutex::new(behavior),
            })
        }

        fn set(&self, behavior: Behavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: &DownstreamRequest) -> Result<DownstreamResponse> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let behavior = *self.behavior.lock().unwrap();
            match behavior {
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Behavior::Refuse => Err(ProxyError::Transport {
                    target: request.url.clone(),
                    reason: "connection refused".to_string(),
                }),
                Behavior::Status(status) => {
                    Ok(DownstreamResponse::live(status, Bytes::from_static(b"{}")))
                }
            }
        }
    }

    fn client(transport: Arc<MockTransport>) -> DownstreamClient {
        DownstreamClient::with_transport(transport, CircuitBreakerConfig::default())
    }

    fn product_call() -> DownstreamRequest {
        DownstreamRequest::get("http://10.0.0.2:3002/products/p1")
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_open_circuit_then_probe_after_reset() {
        let transport = MockTransport::new(Behavior::Hang);
        let client = client(transport.clone());

        for _ in 0..5 {
            let err = client.call("product-service", product_call()).await.unwrap_err();
            assert!(matches!(err, ProxyError::Timeout { timeout_ms: 3000, .. }));
        }
        assert_eq!(transport.attempts(), 5);

        // Sixth call short-circuits without a network attempt
        let fallback = client.call("product-service", product_call()).await.unwrap();
        assert!(fallback.is_fallback());
        assert_eq!(fallback.status, 503);
        assert_eq!(transport.attempts(), 5);

        tokio::time::advance(Duration::from_secs(15)).await;
        transport.set(Behavior::Status(200));

        // Seventh call is the probe
        let probe = client.call("product-service", product_call()).await.unwrap();
        assert!(!probe.is_fallback());
        assert_eq!(transport.attempts(), 6);
        assert_eq!(
            client.breakers().get("product-service").state(),
            CircuitState::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_per_target() {
        let transport = MockTransport::new(Behavior::Refuse);
        let client = client(transport.clone());

        for _ in 0..5 {
            assert!(client.call("product-service", product_call()).await.is_err());
        }
        assert!(client
            .call("product-service", product_call())
            .await
            .unwrap()
            .is_fallback());

        // A different target is still closed
        transport.set(Behavior::Status(200));
        let other = client
            .call("user-service", DownstreamRequest::get("http://10.0.0.3:3001/users/1"))
            .await
            .unwrap();
        assert!(!other.is_fallback());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_count_but_client_errors_do_not() {
        let transport = MockTransport::new(Behavior::Status(404));
        let client = client(transport.clone());

        for _ in 0..10 {
            let response = client.call("product-service", product_call()).await.unwrap();
            assert_eq!(response.status, 404);
        }
        assert_eq!(
            client.breakers().get("product-service").state(),
            CircuitState::Closed
        );

        transport.set(Behavior::Status(500));
        for _ in 0..5 {
            let response = client.call("product-service", product_call()).await.unwrap();
            assert_eq!(response.status, 500);
            assert!(!response.is_fallback());
        }
        assert_eq!(
            client.breakers().get("product-service").state(),
            CircuitState::Open
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_keeps_circuit_open() {
        let transport = MockTransport::new(Behavior::Refuse);
        let client = client(transport.clone());

        for _ in 0..5 {
            let _ = client.call("product-service", product_call()).await;
        }
        tokio::time::advance(Duration::from_secs(15)).await;

        assert!(client.call("product-service", product_call()).await.is_err());
        assert_eq!(transport.attempts(), 6);

        let response = client.call("product-service", product_call()).await.unwrap();
        assert!(response.is_fallback());
        assert_eq!(transport.attempts(), 6);
    }

    #[test]
    fn test_fallback_is_distinguishable() {
        let fallback = DownstreamResponse::fallback("product-service");
        assert!(fallback.is_fallback());
        assert!(!fallback.is_success());
        assert_eq!(
            fallback.error_message().unwrap(),
            "product-service temporarily unavailable; circuit is open"
        );

        let live = DownstreamResponse::live(503, Bytes::from_static(b"{\"error\":\"down\"}"));
        assert!(!live.is_fallback());
    }

    #[test]
    fn test_request_builder() {
        let request = DownstreamRequest::new(Method::POST, "http://h:1/orders")
            .with_json(serde_json::json!({"id": 1}))
            .with_header("x-user-id", "u1");
        assert_eq!(request.method, Method::POST);
        assert!(request.body.is_some());
        assert_eq!(request.headers, vec![("x-user-id".to_string(), "u1".to_string())]);
    }
}
