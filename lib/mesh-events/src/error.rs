use thiserror::Error;

pub type Result<T> = std::result::Result<T, EventError>;

#[derive(Error, Debug)]
pub enum EventError {
    /// No channel has been established yet
    #[error("Broker channel not ready")]
    NotReady,

    #[error("Broker connection error: {0}")]
    Connection(String),

    /// A declaration conflicts with what the broker already holds
    #[error("Declaration rejected by broker: {0}")]
    PreconditionFailed(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    /// Payload that cannot be decoded as an event
    #[error("Malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Business processing of a well-formed event failed
    #[error("Event handler failed: {0}")]
    Handler(String),

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),
}

impl EventError {
    /// Errors after which the channel must be re-acquired
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            EventError::Connection(_) | EventError::PreconditionFailed(_)
        )
    }
}
