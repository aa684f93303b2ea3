//! `POST /list/{id}/checkout`: validate products, publish the checkout event

use hyper::body::Bytes;
use hyper::{Method, Request, Response, StatusCode};
use mesh_events::{CheckoutEvent, EventPublisher};
use mesh_proxy::{HttpProxy, ProxyError, ServiceClient, PRINCIPAL_HEADER};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

/// User id recorded when the request carries none
const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    total_amount: f64,
    #[serde(default)]
    items: Vec<Value>,
}

pub struct CheckoutHandler {
    products: ServiceClient,
    product_service: String,
    publisher: EventPublisher,
}

impl CheckoutHandler {
    pub fn new(
        products: ServiceClient,
        product_service: impl Into<String>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            products,
            product_service: product_service.into(),
            publisher,
        }
    }

    pub async fn handle(&self, req: Request<Bytes>) -> Response<Bytes> {
        let path = req.uri().path();

        if req.method() == Method::GET && path == "/health" {
            return HttpProxy::json_response(StatusCode::OK, &json!({ "status": "UP" }));
        }

        match (req.method(), Self::list_id(path)) {
            (&Method::POST, Some(list_id)) => self.checkout(list_id, &req).await,
            _ => HttpProxy::not_found_response("Route not found"),
        }
    }

    /// `{id}` out of `/list/{id}/checkout`
    fn list_id(path: &str) -> Option<&str> {
        let id = path.strip_prefix("/list/")?.strip_suffix("/checkout")?;
        (!id.is_empty() && !id.contains('/')).then_some(id)
    }

    async fn checkout(&self, list_id: &str, req: &Request<Bytes>) -> Response<Bytes> {
        let body: CheckoutRequest = if req.body().is_empty() {
            CheckoutRequest::default()
        } else {
            match serde_json::from_slice(req.body()) {
                Ok(body) => body,
                Err(e) => {
                    return HttpProxy::error_json(
                        StatusCode::BAD_REQUEST,
                        &format!("Invalid checkout body: {}", e),
                    )
                }
            }
        };

        if !body.total_amount.is_finite() || body.total_amount < 0.0 {
            return HttpProxy::error_json(
                StatusCode::BAD_REQUEST,
                "totalAmount must be a non-negative number",
            );
        }

        let user_id = req
            .headers()
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or(body.user_id)
            .unwrap_or_else(|| ANONYMOUS_USER.to_string());

        if let Some(rejection) = self.validate_products(&body.items).await {
            return rejection;
        }

        let event = CheckoutEvent::new(list_id, user_id, body.total_amount, body.items);
        match self.publisher.publish(&event).await {
            Ok(true) => {
                info!(list_id = %list_id, event_id = %event.event_id, "Checkout accepted");
                HttpProxy::json_response(
                    StatusCode::ACCEPTED,
                    &json!({
                        "message": "Checkout started",
                        "eventId": event.event_id,
                    }),
                )
            }
            Ok(false) => HttpProxy::service_unavailable_response("Messaging service unavailable"),
            Err(e) => {
                warn!(list_id = %list_id, error = %e, "Checkout event not published");
                HttpProxy::service_unavailable_response("Messaging service unavailable")
            }
        }
    }

    /// Rejection for the first item whose `productId` cannot be confirmed
    async fn validate_products(&self, items: &[Value]) -> Option<Response<Bytes>> {
        let product_ids = items
            .iter()
            .filter_map(|item| item.get("productId").and_then(Value::as_str));

        for product_id in product_ids {
            let path = format!("/products/{}", product_id);
            match self.products.get_json::<Value>(&self.product_service, &path).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Some(HttpProxy::not_found_response(&format!(
                        "Product {} not found",
                        product_id
                    )))
                }
                Err(ProxyError::CircuitOpen { message, .. }) => {
                    return Some(HttpProxy::service_unavailable_response(&message))
                }
                Err(e) => {
                    warn!(product_id = %product_id, error = %e, "Product lookup failed");
                    return Some(HttpProxy::service_unavailable_response(
                        "Product service unavailable",
                    ));
                }
            }
        }
        None
    }
}
