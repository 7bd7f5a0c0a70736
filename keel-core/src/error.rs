//! Error types for Keel core operations.
//!
//! All errors must be handled explicitly. No silent failures, no ignored
//! errors.

use std::fmt;

/// The result type for Keel core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur validating core types and configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A resource limit was exceeded.
    LimitExceeded {
        /// Which limit was exceeded.
        limit: &'static str,
        /// The maximum allowed value.
        max: u64,
        /// The actual value that exceeded the limit.
        actual: u64,
    },

    /// An invalid argument was provided.
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// The requested resource was not found.
    NotFound {
        /// The type of resource.
        resource: &'static str,
        /// A display form of the resource identifier.
        id: String,
    },

    /// The operation is not permitted in the current state.
    InvalidState {
        /// The current state.
        current: &'static str,
        /// The required state for this operation.
        required: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitExceeded { limit, max, actual } => {
                write!(f, "limit exceeded: {limit} (max={max}, actual={actual})")
            }
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument '{name}': {reason}")
            }
            Self::NotFound { resource, id } => {
                write!(f, "{resource} not found: {id}")
            }
            Self::InvalidState { current, required } => {
                write!(f, "invalid state: in {current}, need {required}")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_exceeded_display() {
        let err = Error::LimitExceeded {
            limit: "shards_per_node",
            max: 1000,
            actual: 1001,
        };
        let msg = format!("{err}");
        assert!(msg.contains("shards_per_node"));
        assert!(msg.contains("1000"));
        assert!(msg.contains("1001"));
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::NotFound {
            resource: "index",
            id: "logs-2026".to_string(),
        };
        assert_eq!(format!("{err}"), "index not found: logs-2026");
    }
}
