//! Error types for the Tenant Operator

use thiserror::Error;

/// Result type for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the operator
#[derive(Debug, Error)]
pub enum Error {
    /// Object does not exist in the store
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    /// Object already exists in the store
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: String },

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Object could not be (de)serialized
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Object metadata lacks the fields needed to address it
    #[error("Object has no {0}")]
    MissingObjectKey(&'static str),

    /// The invocation context was cancelled before the reconcile finished
    #[error("Reconciliation cancelled")]
    Cancelled,
}

impl Error {
    /// True when the error reports a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_detected() {
        let err = Error::NotFound {
            kind: "Namespace".to_string(),
            key: "ns-a".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Namespace ns-a not found");
        assert!(!Error::KubeError("boom".to_string()).is_not_found());
    }
}
