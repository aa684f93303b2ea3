//! Resolve-then-call client for service-to-service lookups

use crate::{DownstreamClient, DownstreamRequest, ProxyError, Resolve, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Calls a named service at a freshly resolved address through the
/// breaker-wrapped downstream client.
///
/// A 404 answer is `Ok(None)`: a missing resource is not a system failure.
pub struct ServiceClient {
    resolver: Arc<dyn Resolve>,
    downstream: Arc<DownstreamClient>,
}

impl ServiceClient {
    pub fn new(resolver: Arc<dyn Resolve>, downstream: Arc<DownstreamClient>) -> Self {
        Self {
            resolver,
            downstream,
        }
    }

    pub fn downstream(&self) -> &Arc<DownstreamClient> {
        &self.downstream
    }

    /// GET `path` on `service` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        service: &str,
        path: &str,
    ) -> Result<Option<T>> {
        let endpoint = self.resolver.resolve(service).await?;
        let request = DownstreamRequest::get(endpoint.url(path));

        let response = self.downstream.call(service, request).await?;

        if response.is_fallback() {
            return Err(ProxyError::CircuitOpen {
                target: service.to_string(),
                message: response
                    .error_message()
                    .unwrap_or_else(|| format!("{} temporarily unavailable", service)),
            });
        }

        match response.status {
            404 => {
                debug!(service = %service, path = %path, "Resource not found");
                Ok(None)
            }
            status if (200..300).contains(&status) => Ok(Some(response.json()?)),
            status => Err(ProxyError::UnexpectedStatus {
                target: service.to_string(),
                status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CircuitBreakerConfig, DiscoveryResolver, DownstreamResponse, Transport};
    use async_trait::async_trait;
    use hyper::body::Bytes;
    use mesh_core::{InMemoryRegistryStore, RegistryStore};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Product {
        id: String,
        price: f64,
    }

    /// Catalog backend: `p1` exists, `/products/down` fails while `down` is set
    struct CatalogTransport {
        down: AtomicBool,
    }

    #[async_trait]
    impl Transport for CatalogTransport {
        async fn send(&self, request: &DownstreamRequest) -> Result<DownstreamResponse> {
            if self.down.load(Ordering::SeqCst) {
                return Err(ProxyError::Transport {
                    target: request.url.clone(),
                    reason: "connection refused".to_string(),
                });
            }
            if request.url.ends_with("/products/p1") {
                Ok(DownstreamResponse::live(
                    200,
                    Bytes::from_static(b"{\"id\":\"p1\",\"price\":2.5}"),
                ))
            } else if request.url.ends_with("/products/teapot") {
                Ok(DownstreamResponse::live(418, Bytes::new()))
            } else {
                Ok(DownstreamResponse::live(404, Bytes::from_static(b"{\"error\":\"not found\"}")))
            }
        }
    }

    async fn client(down: bool) -> ServiceClient {
        let store = Arc::new(InMemoryRegistryStore::new(Duration::from_secs(10)));
        store.register("product-service", "10.0.0.2", 3002).await.unwrap();
        let transport = Arc::new(CatalogTransport {
            down: AtomicBool::new(down),
        });
        ServiceClient::new(
            Arc::new(DiscoveryResolver::new(store)),
            Arc::new(DownstreamClient::with_transport(
                transport,
                CircuitBreakerConfig::default(),
            )),
        )
    }

    #[tokio::test]
    async fn test_found_and_not_found() {
        let client = client(false).await;

        let found: Option<Product> = client
            .get_json("product-service", "/products/p1")
            .await
            .unwrap();
        assert_eq!(
            found,
            Some(Product {
                id: "p1".to_string(),
                price: 2.5
            })
        );

        let missing: Option<Product> = client
            .get_json("product-service", "/products/p9")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_unexpected_status() {
        let client = client(false).await;
        let err = client
            .get_json::<Product>("product-service", "/products/teapot")
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UnexpectedStatus { status: 418, .. }));
    }

    #[tokio::test]
    async fn test_unregistered_service() {
        let client = client(false).await;
        let err = client
            .get_json::<Product>("user-service", "/users/1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NoLiveInstance(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_surfaces_as_circuit_open() {
        let client = client(true).await;

        for _ in 0..5 {
            let err = client
                .get_json::<Product>("product-service", "/products/p1")
                .await
                .unwrap_err();
            assert!(matches!(err, ProxyError::Transport { .. }));
        }

        let err = client
            .get_json::<Product>("product-service", "/products/p1")
            .await
            .unwrap_err();
        match err {
            ProxyError::CircuitOpen { target, message } => {
                assert_eq!(target, "product-service");
                assert!(message.contains("circuit is open"));
            }
            other => panic!("expected CircuitOpen, got {:?}", other),
        }
    }
}
