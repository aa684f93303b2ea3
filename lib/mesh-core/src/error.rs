use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Invalid registry configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Registry store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
