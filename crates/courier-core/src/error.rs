//! Shared error taxonomy for the delivery core.
//!
//! Storage failures always propagate: the queue entries and lead records are
//! the durable source of truth, so callers must never believe a write
//! succeeded when it did not. Validation failures are reported as-is and
//! never coerced to a "closest valid" value.

use thiserror::Error;

use crate::models::LeadStatus;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors shared by the core domain and its storage collaborators.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A backing-store operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A lead status change is not an edge in the lifecycle graph.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the lead currently holds.
        from: LeadStatus,
        /// Status the caller attempted to move to.
        to: LeadStatus,
    },

    /// Caller-supplied data failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Creates a storage error from a message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a not-found error from a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates an invalid-input error from a message.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_transition_states() {
        let err = CoreError::InvalidTransition { from: LeadStatus::Declined, to: LeadStatus::Emailed };
        assert_eq!(err.to_string(), "invalid status transition: declined -> emailed");
    }

    #[test]
    fn constructor_helpers_build_expected_variants() {
        assert!(matches!(CoreError::storage("boom"), CoreError::Storage(_)));
        assert!(matches!(CoreError::not_found("lead"), CoreError::NotFound(_)));
        assert!(matches!(CoreError::invalid_input("bad"), CoreError::InvalidInput(_)));
    }
}
