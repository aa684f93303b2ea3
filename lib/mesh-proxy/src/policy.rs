//! Circuit breaking for service-to-service calls

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally
    Closed,
    /// Circuit is open - requests are short-circuited to the fallback
    Open,
    /// Circuit is half-open - a single probe request is allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration
#[derive(Clone, Debug, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time spent open before a probe is let through
    pub reset_timeout: Duration,
    /// Per-call timeout, enforced whatever the breaker state
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(15),
            call_timeout: Duration::from_secs(3),
        }
    }
}

/// Admission granted by the breaker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permit {
    /// Normal call while closed
    Call,
    /// The single trial call while half-open
    Probe,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_started_at: Option<Instant>,
}

/// Circuit breaker for one downstream target
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_started_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // The inner state stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move OPEN to HALF_OPEN once the reset interval has elapsed
    fn advance(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|opened| now.duration_since(opened))
            .unwrap_or(self.config.reset_timeout);
        if elapsed >= self.config.reset_timeout {
            info!(target_service = %self.name, "Circuit breaker half-open");
            inner.state = CircuitState::HalfOpen;
            inner.probe_started_at = None;
        }
    }

    /// Get the current state
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.advance(&mut inner, Instant::now());
        inner.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Ask to make a call. `None` means short-circuit to the fallback.
    pub fn try_acquire(&self) -> Option<Permit> {
        let now = Instant::now();
        let mut inner = self.lock();
        self.advance(&mut inner, now);

        match inner.state {
            CircuitState::Closed => Some(Permit::Call),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                // A probe that outlived the call timeout was abandoned
                let probe_live = inner
                    .probe_started_at
                    .map(|started| now.duration_since(started) < self.config.call_timeout)
                    .unwrap_or(false);
                if probe_live {
                    None
                } else {
                    debug!(target_service = %self.name, "Circuit breaker letting probe through");
                    inner.probe_started_at = Some(now);
                    Some(Permit::Probe)
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self, permit: Permit) {
        let mut inner = self.lock();
        match (inner.state, permit) {
            (CircuitState::HalfOpen, Permit::Probe) => {
                info!(target_service = %self.name, "Circuit breaker closed after successful probe");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_started_at = None;
            }
            (CircuitState::Closed, _) => {
                inner.consecutive_failures = 0;
            }
            _ => {}
        }
    }

    /// Record a failed call (timeout or transport error)
    pub fn record_failure(&self, permit: Permit) {
        let now = Instant::now();
        let mut inner = self.lock();
        match (inner.state, permit) {
            (CircuitState::Closed, _) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        target_service = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            (CircuitState::HalfOpen, Permit::Probe) => {
                warn!(target_service = %self.name, "Circuit breaker re-opened after failed probe");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.probe_started_at = None;
            }
            _ => {}
        }
    }
}

/// One breaker per downstream target, created on first use
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Breaker for `target`
    pub fn get(&self, target: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(target, self.config.clone())))
            .clone()
    }

    /// Snapshot of every known breaker state, sorted by target
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        let mut states: Vec<(String, CircuitState)> = breakers
            .iter()
            .map(|b| (b.name().to_string(), b.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
