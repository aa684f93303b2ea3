use mesh_core::CoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// No live instance of the service is registered
    #[error("No live instance of service: {0}")]
    NoLiveInstance(String),

    /// Connection-level failure reaching a resolved instance
    #[error("Transport error calling {target}: {reason}")]
    Transport { target: String, reason: String },

    /// The per-call timeout elapsed before the downstream answered
    #[error("Call to {target} timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },

    /// The breaker for the target is open and served its fallback
    #[error("Circuit open for {target}: {message}")]
    CircuitOpen { target: String, message: String },

    /// The downstream answered with an unexpected status
    #[error("Unexpected status {status} from {target}")]
    UnexpectedStatus { target: String, status: u16 },

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ProxyError {
    /// Failures that count against a circuit breaker
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::Transport { .. } | ProxyError::Timeout { .. }
        )
    }
}
