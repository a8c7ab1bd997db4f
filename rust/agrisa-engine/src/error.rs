//! Error types for the Agrisa engine

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error types for the monitoring and lifecycle engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Inputs violate invariants; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing entity
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Condition's cached cost components disagree with live data-source pricing
    #[error("Cost mismatch on condition {condition_id}: {detail}")]
    CostMismatch {
        condition_id: String,
        detail: String,
    },

    /// Operation not legal in the current state
    #[error("Invalid state transition from {from} to {to}")]
    StateTransition { from: String, to: String },

    /// Upstream HTTP non-2xx or timeout; retried with backoff
    #[error("Upstream error: {0}")]
    UpstreamTransient(String),

    /// Database or cache I/O failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notification delivery failure; non-critical
    #[error("Notification error: {0}")]
    Notification(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Construct a not-found error for an entity kind and id
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the error is transient and worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamTransient(_) | Self::Storage(_))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage(format!("serialization error: {}", err))
    }
}
