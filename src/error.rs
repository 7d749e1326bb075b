//! Error types for inference graph synthesis and admission

use thiserror::Error;

/// Main error type for inference-graph operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A submitted SeldonDeployment was rejected at admission
    ///
    /// The message is the human-readable reason returned to the API server.
    #[error("validation error: {0}")]
    Validation(String),

    /// Encoding or decoding a value failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The model artifact initializer could not wire a container
    #[error("initializer error for container {container}: {message}")]
    Initializer {
        /// Container the initializer was targeting
        container: String,
        /// Description of what failed
        message: String,
    },

    /// An admission payload could not be decoded into a SeldonDeployment
    #[error("decode error: {0}")]
    Decode(String),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an initializer error for the given container
    pub fn initializer(container: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Initializer {
            container: container.into(),
            message: msg.into(),
        }
    }

    /// Create a decode error with the given message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this is an admission rejection rather than a failure
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Categories
    // ==========================================================================

    /// Story: rejections carry the reason verbatim for the admission response
    #[test]
    fn story_validation_reason_is_preserved() {
        let err = Error::validation("Duplicate Predictor Name main");
        assert!(err.is_rejection());
        assert!(err.to_string().contains("validation error"));

        match err {
            Error::Validation(reason) => assert_eq!(reason, "Duplicate Predictor Name main"),
            _ => panic!("Expected Validation variant"),
        }
    }

    /// Story: collaborator failures name the container they were wiring
    #[test]
    fn story_initializer_error_names_container() {
        let err = Error::initializer("classifier", "container not found in deployment");
        assert!(!err.is_rejection());
        assert!(err.to_string().contains("classifier"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn story_failures_are_not_rejections() {
        assert!(!Error::serialization("bad value").is_rejection());
        assert!(!Error::decode("missing field").is_rejection());
        assert!(!Error::internal("boom").is_rejection());
    }

    #[test]
    fn test_serde_json_error_converts_to_serialization() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
