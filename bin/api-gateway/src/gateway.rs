//! Request handling: health, metrics, authentication, routing, proxying

use crate::auth::JwtVerifier;
use crate::router::Router;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use mesh_proxy::{HttpProxy, MetricsCollector, MiddlewareChain, MiddlewareContext, ProxyError};
use tracing::{debug, warn};

pub struct Gateway {
    router: Router,
    auth: JwtVerifier,
    proxy: HttpProxy,
    middleware: MiddlewareChain,
    metrics: MetricsCollector,
}

impl Gateway {
    pub fn new(
        router: Router,
        auth: JwtVerifier,
        proxy: HttpProxy,
        middleware: MiddlewareChain,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            router,
            auth,
            proxy,
            middleware,
            metrics,
        }
    }

    pub async fn handle(&self, req: Request<Bytes>) -> Response<Bytes> {
        let path = req.uri().path().to_string();

        if req.method() == Method::GET && path == "/health" {
            return HttpProxy::json_response(
                StatusCode::OK,
                &serde_json::json!({ "status": "Gateway UP" }),
            );
        }

        if req.method() == Method::GET && path == "/metrics" {
            return self.metrics_response();
        }

        let context = MiddlewareContext::from_request(&req);

        let principal = if self.router.is_public(&path) {
            None
        } else {
            match self.auth.authenticate(req.headers()) {
                Ok(principal) => Some(principal),
                Err(e) => {
                    debug!(path = %path, error = %e, "Rejected request");
                    let status =
                        StatusCode::from_u16(e.status()).unwrap_or(StatusCode::UNAUTHORIZED);
                    return self
                        .finish(&context, HttpProxy::error_json(status, &e.to_string()))
                        .await;
                }
            }
        };

        let Some(route) = self.router.route(&path, req.uri().query()) else {
            return self
                .finish(&context, HttpProxy::not_found_response("Route not found"))
                .await;
        };

        let context = context.with_service(&route.service);
        if let Err(e) = self.middleware.on_request(&context).await {
            debug!("Middleware on_request error: {}", e);
        }

        let response = match self
            .proxy
            .proxy(&route.service, &route.upstream, req, principal.as_deref())
            .await
        {
            Ok(proxied) => {
                self.metrics.record_route_cache(proxied.from_cache);
                proxied.response
            }
            Err(e) => {
                if let ProxyError::NoLiveInstance(service) = &e {
                    self.metrics.record_route_cache(false);
                    self.metrics.record_resolution_failure(service);
                }
                warn!(service = %route.service, error = %e, "Proxy error");
                if let Err(mw_err) = self.middleware.on_error(&context, &e.to_string()).await {
                    debug!("Middleware on_error error: {}", mw_err);
                }
                HttpProxy::error_response(&e)
            }
        };

        self.finish(&context, response).await
    }

    async fn finish(
        &self,
        context: &MiddlewareContext,
        response: Response<Bytes>,
    ) -> Response<Bytes> {
        if let Err(e) = self
            .middleware
            .on_response(context, response.status().as_u16())
            .await
        {
            debug!("Middleware on_response error: {}", e);
        }
        response
    }

    fn metrics_response(&self) -> Response<Bytes> {
        match self.metrics.gather() {
            Ok(text) => {
                let mut response = Response::new(Bytes::from(text));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                warn!(error = %e, "Failed to gather metrics");
                HttpProxy::error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics")
            }
        }
    }
}
