use crate::{ExchangeSpec, Result};
use async_trait::async_trait;

/// Publishing side of a message broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Assert `spec` exists; a conflicting prior declaration is `PreconditionFailed`
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()>;

    /// Hand a persistent message to the broker.
    ///
    /// `Ok(false)` means the outbound buffer refused it. Neither value says
    /// whether any consumer received it.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<bool>;
}
