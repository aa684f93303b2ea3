//! Spend per user accumulated from checkout events

use async_trait::async_trait;
use lru::LruCache;
use mesh_events::{CheckoutEvent, EventError, EventHandler, Result};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

struct Totals {
    spend: HashMap<String, f64>,
    // recently counted event ids
    seen: LruCache<String, ()>,
}

pub struct AnalyticsHandler {
    totals: Mutex<Totals>,
}

impl AnalyticsHandler {
    /// Handler deduplicating over the last `capacity` event ids
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            totals: Mutex::new(Totals {
                spend: HashMap::new(),
                seen: LruCache::new(capacity),
            }),
        }
    }

    /// Event ids currently remembered for deduplication
    pub fn remembered(&self) -> usize {
        self.lock().seen.len()
    }

    fn lock(&self) -> MutexGuard<'_, Totals> {
        self.totals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Total checked out by `user_id` so far
    pub fn spend_for(&self, user_id: &str) -> f64 {
        self.lock().spend.get(user_id).copied().unwrap_or(0.0)
    }
}

#[async_trait]
impl EventHandler for AnalyticsHandler {
    fn name(&self) -> &str {
        "analytics"
    }

    async fn handle(&self, event: &CheckoutEvent) -> Result<()> {
        if !event.total_amount.is_finite() {
            return Err(EventError::Handler(format!(
                "non-numeric total for event {}",
                event.event_id
            )));
        }

        let mut totals = self.lock();
        if totals.seen.put(event.event_id.clone(), ()).is_some() {
            debug!(event_id = %event.event_id, "Event already counted");
            return Ok(());
        }

        let spend = totals.spend.entry(event.user_id.clone()).or_insert(0.0);
        *spend += event.total_amount;
        info!(
            user_id = %event.user_id,
            list_id = %event.list_id,
            total = event.total_amount,
            user_spend = *spend,
            "Updated spend"
        );
        Ok(())
    }
}
