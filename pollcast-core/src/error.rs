//! Core error types for Pollcast.

use thiserror::Error;

/// Core error type for Pollcast operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid data from an API response.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event could not be handed to the publisher.
    #[error("Publish error: {0}")]
    Publish(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}
