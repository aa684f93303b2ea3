//! Order creation from checkout events
//!
//! Orders are keyed by the event id, so a redelivered event never creates a
//! second order. Only the most recent orders are kept in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use mesh_events::{CheckoutEvent, EventError, EventHandler, Result};
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub original_list_id: String,
    pub user_id: String,
    pub items: Vec<serde_json::Value>,
    pub total: f64,
    pub status: String,
    pub processed_at: DateTime<Utc>,
}

impl Order {
    fn completed(event: &CheckoutEvent) -> Self {
        Self {
            order_id: Uuid::new_v4().to_string(),
            original_list_id: event.list_id.clone(),
            user_id: event.user_id.clone(),
            items: event.items.clone(),
            total: event.total_amount,
            status: "COMPLETED".to_string(),
            processed_at: Utc::now(),
        }
    }
}

pub struct OrdersHandler {
    // event id -> order
    orders: Mutex<LruCache<String, Order>>,
}

impl OrdersHandler {
    /// Handler remembering at most `capacity` orders
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            orders: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Order>> {
        self.orders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn order_count(&self) -> usize {
        self.lock().len()
    }

    pub fn order_for(&self, event_id: &str) -> Option<Order> {
        self.lock().peek(event_id).cloned()
    }
}

#[async_trait]
impl EventHandler for OrdersHandler {
    fn name(&self) -> &str {
        "orders"
    }

    async fn handle(&self, event: &CheckoutEvent) -> Result<()> {
        if !event.total_amount.is_finite() || event.total_amount < 0.0 {
            return Err(EventError::Handler(format!(
                "invalid total {} for list {}",
                event.total_amount, event.list_id
            )));
        }

        let mut orders = self.lock();
        if let Some(existing) = orders.get(&event.event_id) {
            info!(
                event_id = %event.event_id,
                order_id = %existing.order_id,
                "Event already processed, no new order"
            );
            return Ok(());
        }

        let order = Order::completed(event);
        info!(
            event_id = %event.event_id,
            order_id = %order.order_id,
            list_id = %order.original_list_id,
            user_id = %order.user_id,
            total = order.total,
            "Order created"
        );
        orders.put(event.event_id.clone(), order);
        Ok(())
    }
}
