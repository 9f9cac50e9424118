//! Error types for the event envelope.

use thiserror::Error;

/// Result type for envelope operations
pub type EventResult<T> = Result<T, EventError>;

/// Errors raised while encoding or decoding events
#[derive(Error, Debug)]
pub enum EventError {
    /// Payload or envelope could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Bytes or payload did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

