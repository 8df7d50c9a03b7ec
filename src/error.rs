use thiserror::Error;

/// Custom error types for the watch-party server
#[derive(Debug, Error)]
pub enum PartyError {
    /// Room and membership errors
    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Connection {0} not found")]
    ConnectionNotFound(String),

    /// Control channel errors
    #[error("Invalid control action: {0}")]
    InvalidControlAction(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Media acquisition errors
    #[error("Media acquisition failed: {0}")]
    AcquisitionFailed(String),

    #[error("Acquisition service unreachable: {0}")]
    ServiceUnreachable(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Engine event queue closed; only happens during shutdown
    #[error("Party engine is not running")]
    EngineUnavailable,

    /// Generic errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using PartyError
pub type Result<T> = std::result::Result<T, PartyError>;

impl PartyError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        PartyError::Internal(msg.into())
    }

    /// Helper to create acquisition errors
    pub fn acquisition(msg: impl Into<String>) -> Self {
        PartyError::AcquisitionFailed(msg.into())
    }
}

impl From<reqwest::Error> for PartyError {
    fn from(err: reqwest::Error) -> Self {
        PartyError::ServiceUnreachable(err.to_string())
    }
}
