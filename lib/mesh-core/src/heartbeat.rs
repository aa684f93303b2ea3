//! Heartbeat publisher keeping one service instance registered
//!
//! Registers immediately on start and again on every interval tick. A failed
//! write is logged and retried on the next tick; the loop only ends when the
//! handle is stopped. There is no deregistration: once heartbeats stop, the
//! entry disappears from the store within one TTL window.

use crate::registration;
use crate::{RegistryConfig, RegistryStore, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Counters for heartbeat writes
#[derive(Debug, Default)]
pub struct HeartbeatStats {
    successes: AtomicU64,
    failures: AtomicU64,
}

impl HeartbeatStats {
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}

pub struct HeartbeatPublisher {
    store: Arc<dyn RegistryStore>,
    service_name: String,
    host: String,
    port: u16,
    interval: Duration,
    stats: Arc<HeartbeatStats>,
}

impl HeartbeatPublisher {
    /// Create a publisher for `(service_name, host, port)`
    pub fn new(
        store: Arc<dyn RegistryStore>,
        service_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        config: &RegistryConfig,
    ) -> Result<Self> {
        config.validate()?;

        let service_name = service_name.into();
        let host = host.into();
        registration::validate(&service_name, &host, port)?;

        Ok(Self {
            store,
            service_name,
            host,
            port,
            interval: config.heartbeat_interval,
            stats: Arc::new(HeartbeatStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<HeartbeatStats> {
        self.stats.clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Write or refresh the registry entry once
    pub async fn beat(&self) -> Result<()> {
        match self
            .store
            .register(&self.service_name, &self.host, self.port)
            .await
        {
            Ok(()) => {
                self.stats.successes.fetch_add(1, Ordering::SeqCst);
                debug!(
                    service = %self.service_name,
                    host = %self.host,
                    port = self.port,
                    "Heartbeat written"
                );
                Ok(())
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Heartbeat until the task is cancelled
    pub async fn run(self) {
        info!(
            service = %self.service_name,
            host = %self.host,
            port = self.port,
            interval_ms = self.interval.as_millis() as u64,
            ttl_ms = self.store.ttl().as_millis() as u64,
            "Starting heartbeat"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // The first tick completes immediately
            ticker.tick().await;

            if let Err(e) = self.beat().await {
                warn!(
                    service = %self.service_name,
                    error = %e,
                    "Heartbeat failed, retrying on next tick"
                );
            }
        }
    }

    /// Run the heartbeat on a background task
    pub fn spawn(self) -> HeartbeatHandle {
        let stats = self.stats.clone();
        let task = tokio::spawn(self.run());
        HeartbeatHandle { task, stats }
    }
}

/// Handle to a running heartbeat task
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
    stats: Arc<HeartbeatStats>,
}

impl HeartbeatHandle {
    pub fn stats(&self) -> &HeartbeatStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop heartbeating. The registry entry is left to expire.
    pub fn stop(self) {
        self.task.abort();
    }
}
