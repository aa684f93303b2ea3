//! The checkout-completed event

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable description of a completed checkout.
///
/// Each bound queue receives its own serialized copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub list_id: String,
    pub user_id: String,
    pub total_amount: f64,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

impl CheckoutEvent {
    /// New event with a fresh v4 id stamped now
    pub fn new(
        list_id: impl Into<String>,
        user_id: impl Into<String>,
        total_amount: f64,
        items: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            list_id: list_id.into(),
            user_id: user_id.into(),
            total_amount,
            items,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
