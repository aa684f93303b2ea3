//! Discovery-driven HTTP proxying
//!
//! The target address is resolved per request (through the route cache),
//! never fixed when a route is registered.

use crate::{CachedResolver, ProxyError, RequestForwarder, Result};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use mesh_core::Endpoint;
use std::sync::Arc;
use tracing::{debug, warn};

/// Header carrying the authenticated principal to backends
pub const PRINCIPAL_HEADER: &str = "x-user-id";

/// A forwarded response and how its route was found
#[derive(Debug)]
pub struct Proxied {
    pub response: Response<Bytes>,
    pub endpoint: Endpoint,
    pub from_cache: bool,
}

/// HTTP proxy for forwarding requests to backend services
pub struct HttpProxy {
    resolver: Arc<CachedResolver>,
    forwarder: RequestForwarder,
}

impl HttpProxy {
    pub fn new(resolver: Arc<CachedResolver>, forwarder: RequestForwarder) -> Self {
        Self {
            resolver,
            forwarder,
        }
    }

    pub fn resolver(&self) -> &Arc<CachedResolver> {
        &self.resolver
    }

    /// Forward `request` to a live instance of `service` at `path_and_query`.
    ///
    /// Any client-supplied principal header is replaced by `principal`.
    /// A transport failure drops the cached route and is not retried.
    pub async fn proxy(
        &self,
        service: &str,
        path_and_query: &str,
        request: Request<Bytes>,
        principal: Option<&str>,
    ) -> Result<Proxied> {
        let resolved = self.resolver.lookup(service).await?;
        let target_url = resolved.endpoint.url(path_and_query);

        let mut request = request;
        Self::set_principal(&mut request, principal)?;

        debug!(
            service = %service,
            endpoint = %resolved.endpoint,
            from_cache = resolved.from_cache,
            "Proxying request"
        );

        match self.forwarder.forward(&target_url, request).await {
            Ok(response) => Ok(Proxied {
                response,
                endpoint: resolved.endpoint,
                from_cache: resolved.from_cache,
            }),
            Err(e @ ProxyError::Transport { .. }) => {
                warn!(
                    service = %service,
                    endpoint = %resolved.endpoint,
                    error = %e,
                    "Dropping cached route"
                );
                self.resolver.invalidate(service);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn set_principal(request: &mut Request<Bytes>, principal: Option<&str>) -> Result<()> {
        let name = HeaderName::from_static(PRINCIPAL_HEADER);
        let headers = request.headers_mut();
        headers.remove(&name);
        if let Some(principal) = principal {
            let value = HeaderValue::from_str(principal).map_err(|_| {
                ProxyError::InvalidTarget(format!(
                    "principal not usable as a header: {}",
                    principal
                ))
            })?;
            headers.insert(name, value);
        }
        Ok(())
    }

    /// Response for a failed proxy attempt
    pub fn error_response(error: &ProxyError) -> Response<Bytes> {
        match error {
            ProxyError::NoLiveInstance(_) => {
                Self::service_unavailable_response("Service temporarily unavailable")
            }
            _ => Self::bad_gateway_response("Error communicating with the service"),
        }
    }

    /// JSON response with the given status
    pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Bytes> {
        let mut response = Response::new(Bytes::from(body.to_string()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    /// `{"error": reason}` with the given status
    pub fn error_json(status: StatusCode, reason: &str) -> Response<Bytes> {
        Self::json_response(status, &serde_json::json!({ "error": reason }))
    }

    /// Create a 502 Bad Gateway response
    pub fn bad_gateway_response(reason: &str) -> Response<Bytes> {
        Self::error_json(StatusCode::BAD_GATEWAY, reason)
    }

    /// Create a 503 Service Unavailable response
    pub fn service_unavailable_response(reason: &str) -> Response<Bytes> {
        Self::error_json(StatusCode::SERVICE_UNAVAILABLE, reason)
    }

    /// Create a 404 Not Found response
    pub fn not_found_response(reason: &str) -> Response<Bytes> {
        Self::error_json(StatusCode::NOT_FOUND, reason)
    }
}
