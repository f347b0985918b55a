//! Error types for the API gateway operator
//!
//! Errors carry structured fields so log lines and status descriptions can
//! name the APIRule, resource kind or configuration key that failed.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for API gateway operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// APIRule spec cannot be processed
    #[error("validation error for {api_rule}: {message}")]
    Validation {
        /// APIRule in `name.namespace` form
        api_rule: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., ".spec.rules[0].service")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Operator or mode configuration is unusable
    #[error("configuration error [{key}]: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
        /// Configuration key or source (e.g., "jwtHandler")
        key: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "processor", "controller")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            api_rule: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for an APIRule and field path
    pub fn validation_for_field(
        api_rule: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            api_rule: api_rule.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error for a key
    pub fn config(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            key: key.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, serialization and configuration errors need a user fix.
    /// Kubernetes errors are retryable unless the API server rejected the
    /// request with a 4xx code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Config { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// True when the API server answered with 409 Conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// True when the API server answered with 404 Not Found
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    // ==========================================================================
    // Story Tests: how failures surface during APIRule reconciliation
    // ==========================================================================

    /// Story: a field-level validation error names the APIRule and the path
    #[test]
    fn story_validation_error_names_rule_and_field() {
        let err = Error::validation_for_field("httpbin.default", ".spec.host", "Host was nil");
        assert!(err.to_string().contains("httpbin.default"));
        assert!(err.to_string().contains("Host was nil"));
        match err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some(".spec.host")),
            _ => panic!("Expected Validation variant"),
        }
    }

    /// Story: a broken mode ConfigMap is a configuration problem, not a transient one
    #[test]
    fn story_config_errors_are_not_retried() {
        let err = Error::config("jwtHandler", "unknown handler: foo");
        assert!(err.to_string().contains("jwtHandler"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn kube_client_errors_are_retryable_but_4xx_are_not() {
        assert!(!api_error(400).is_retryable());
        assert!(!api_error(404).is_retryable());
        assert!(api_error(500).is_retryable());
        assert!(Error::internal("lost watch").is_retryable());
        assert!(!Error::serialization("bad json").is_retryable());
    }

    #[test]
    fn conflict_and_not_found_are_detected() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(409).is_not_found());
        assert!(api_error(404).is_not_found());
        assert!(!Error::internal("x").is_conflict());
    }

    #[test]
    fn serde_json_errors_convert_to_serialization() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
