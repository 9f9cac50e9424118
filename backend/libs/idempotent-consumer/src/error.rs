//! Error types for idempotent consumer library

use thiserror::Error;

/// Result type for idempotency operations
pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

/// Errors that can occur while checking or recording processed events
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyError {
    /// Backing store could not be reached (network, pool exhaustion, etc.)
    #[error("Idempotency store unavailable: {0}")]
    StoreUnavailable(String),

    /// Event ID validation failed (empty)
    #[error("Invalid event ID: {0}")]
    InvalidEventId(String),
}

impl IdempotencyError {
    /// Check if error is transient (a later lookup may succeed)
    pub fn is_transient(&self) -> bool {
        matches!(self, IdempotencyError::StoreUnavailable(_))
    }
}
