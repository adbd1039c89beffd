//! Error types for the call service

/// Result type alias using the call service [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in call signaling and negotiation operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Device permission denied or no capture device available
    #[error("Media access error: {0}")]
    MediaAccess(String),

    /// Signaling channel join/broadcast failure
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Failure to create or apply an offer, answer, or remote description
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// An operation was invoked in a state that does not permit it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a media permission/availability failure
    ///
    /// Embedding UIs catch this case specifically to show a
    /// permission-denied message instead of a generic call failure.
    pub fn is_media_access(&self) -> bool {
        matches!(self, Error::MediaAccess(_))
    }

    /// Check if this error is a usage error (operation not valid in the
    /// current call state)
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::InvalidState(_))
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Signaling(_) | Error::WebSocket(_) | Error::Io(_)
        )
    }
}
