//! HTTP request/response forwarding to a resolved backend instance

use crate::{ProxyError, Result};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HOST};
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP request forwarder for proxying requests to backend services
/// with connection pooling.
///
/// Only the connect phase is bounded; a slow backend is not cut off here.
/// Failures are returned to the caller and never retried.
pub struct RequestForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    connect_timeout: Duration,
}

impl RequestForwarder {
    /// Create a new HTTP request forwarder with connection pooling
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_keepalive(Some(Duration::from_secs(30)));

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(connector);

        Self {
            client,
            connect_timeout,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Forward a request to a target URL and return the response
    ///
    /// Method, headers (minus hop-by-hop and `Host`) and body are preserved.
    pub async fn forward(
        &self,
        target_url: &str,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>> {
        debug!("Forwarding request to: {}", target_url);

        let uri: Uri = target_url
            .parse()
            .map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", target_url, e)))?;
        let target = uri
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_else(|| target_url.to_string());

        let (mut parts, body) = request.into_parts();
        parts.headers = Self::filter_headers(&parts.headers);
        parts.uri = uri;

        debug!(
            "Request details - method: {}, headers: {}, body: {} bytes",
            parts.method,
            parts.headers.len(),
            body.len()
        );

        let forwarded_request = Request::from_parts(parts, Full::new(body));

        let response = self.client.request(forwarded_request).await.map_err(|e| {
            warn!("Backend request to {} failed: {}", target, e);
            ProxyError::Transport {
                target: target.clone(),
                reason: e.to_string(),
            }
        })?;

        debug!("Backend responded with status: {}", response.status());

        let (response_parts, body) = response.into_parts();
        let response_bytes = body
            .collect()
            .await
            .map_err(|e| ProxyError::Transport {
                target: target.clone(),
                reason: format!("reading response body: {}", e),
            })?
            .to_bytes();

        debug!("Response body size: {} bytes", response_bytes.len());

        Ok(Response::from_parts(response_parts, response_bytes))
    }

    /// Copy headers that may travel to the backend
    fn filter_headers(headers: &HeaderMap) -> HeaderMap {
        let mut filtered = HeaderMap::with_capacity(headers.len());
        for (k, v) in headers.iter() {
            if *k == HOST || Self::is_hop_by_hop_header(k.as_str()) {
                continue;
            }
            filtered.append(k.clone(), v.clone());
        }
        filtered
    }

    /// Check if header is hop-by-hop (should not be forwarded)
    fn is_hop_by_hop_header(name: &str) -> bool {
        matches!(
            name,
            "connection"
                | "keep-alive"
                | "proxy-authenticate"
                | "proxy-authorization"
                | "te"
                | "trailers"
                | "transfer-encoding"
                | "upgrade"
        )
    }
}
