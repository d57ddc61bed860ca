//! Error types for identifier parsing and state transitions.

use thiserror::Error;

/// Errors raised by the core identifier and state-machine types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A node or network identifier does not match the allowed character set.
    #[error("invalid identifier {value:?}: {reason}")]
    InvalidIdentifier { value: String, reason: String },

    /// A role name that is not part of the role catalogue.
    #[error("unknown node role: {0}")]
    UnknownRole(String),

    /// A state change the lifecycle rules do not allow.
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl StateError {
    /// Creates an invalid identifier error.
    pub fn invalid_identifier(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid transition error.
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
