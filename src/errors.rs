// Copyright 2025 Cowboy AI, LLC.

//! Error types for domain operations
//!
//! Storage-layer failures live next to the stores that raise them
//! ([`EventStoreError`](crate::infrastructure::EventStoreError),
//! [`SnapshotError`](crate::infrastructure::SnapshotError),
//! [`ReplayError`](crate::infrastructure::ReplayError)). This module holds the
//! errors a domain operation can raise before any store is touched.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The operation is not allowed from the aggregate's current lifecycle state
    #[error("Invalid state transition: cannot {operation} a transaction in state {from}")]
    InvalidStateTransition {
        /// Current state
        from: String,
        /// Attempted operation
        operation: String,
    },

    /// Input rejected by a domain invariant
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for domain operations
pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl DomainError {
    /// Create an invalid transition error
    pub fn invalid_transition(from: impl Into<String>, operation: impl Into<String>) -> Self {
        DomainError::InvalidStateTransition {
            from: from.into(),
            operation: operation.into(),
        }
    }

    /// Check if this is an invalid state transition
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, DomainError::InvalidStateTransition { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(self, DomainError::ValidationError(_))
    }
}
