//! Error types for livedoc

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for livedoc operations
pub type Result<T> = std::result::Result<T, LiveError>;

/// Main error type for livedoc
#[derive(Error, Debug)]
pub enum LiveError {
    /// The listener could not be established (permission, config, network)
    #[error("Failed to open listener: {0}")]
    OpenFailure(String),

    /// The listener was open but emitted an error
    #[error("Listener failed: {0}")]
    DeliveryFailure(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The subscription cache has been shut down
    #[error("Subscription cache is closed")]
    Closed,
}

impl LiveError {
    /// Check if error is retryable by re-subscribing.
    ///
    /// Permission and configuration failures are not: re-opening the same
    /// query will fail the same way.
    pub fn is_retryable(&self) -> bool {
        match self {
            LiveError::OpenFailure(msg) | LiveError::DeliveryFailure(msg) => {
                let msg = msg.to_lowercase();
                !(msg.contains("permission") || msg.contains("denied") || msg.contains("invalid"))
            }
            LiveError::Io(_) => true,
            _ => false,
        }
    }

    /// Tag used when the error is delivered to consumers
    pub fn kind(&self) -> ErrorKind {
        match self {
            LiveError::OpenFailure(_) => ErrorKind::OpenFailure,
            LiveError::DeliveryFailure(_) => ErrorKind::DeliveryFailure,
            LiveError::InvalidInput(_) | LiveError::InvalidCursor(_) => ErrorKind::InvalidInput,
            LiveError::Closed => ErrorKind::Closed,
            _ => ErrorKind::Internal,
        }
    }

    /// Convert into the clonable form fanned out to consumers
    pub fn to_failure(&self) -> Failure {
        Failure {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Kind of a failure observed by a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    OpenFailure,
    DeliveryFailure,
    InvalidInput,
    Closed,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::OpenFailure => write!(f, "open_failure"),
            ErrorKind::DeliveryFailure => write!(f, "delivery_failure"),
            ErrorKind::InvalidInput => write!(f, "invalid_input"),
            ErrorKind::Closed => write!(f, "closed"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// A tagged failure delivered to every consumer of a key.
///
/// Unlike [`LiveError`] this is `Clone`, so one failure can be shared by all
/// consumers of a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<Failure> for LiveError {
    fn from(failure: Failure) -> Self {
        match failure.kind {
            ErrorKind::OpenFailure => LiveError::OpenFailure(failure.message),
            ErrorKind::DeliveryFailure => LiveError::DeliveryFailure(failure.message),
            ErrorKind::InvalidInput => LiveError::InvalidInput(failure.message),
            ErrorKind::Closed => LiveError::Closed,
            ErrorKind::Internal => LiveError::DeliveryFailure(failure.message),
        }
    }
}
