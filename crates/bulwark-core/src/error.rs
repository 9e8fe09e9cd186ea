//! Error types for bulwark

use std::time::Duration;

use thiserror::Error;

use crate::call::ExecutionModel;

/// Result type alias for decoration and configuration steps
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Errors raised while building policies, breakers or decorated callables.
///
/// These are only ever produced at decoration (or configuration loading) time,
/// never while a decorated callable is being invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// An explicit policy was combined with individual retry settings
    #[error("Configuration error: `policy` cannot be combined with {}", .0.join(", "))]
    ConflictingRetryOptions(Vec<&'static str>),

    /// A policy must allow at least one attempt
    #[error("Configuration error: max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(u32),

    /// The delay cap is below the base delay
    #[error(
        "Configuration error: max_delay ({max_delay:?}) must not be smaller than base_delay ({base_delay:?})"
    )]
    MaxDelayBelowBaseDelay {
        base_delay: Duration,
        max_delay: Duration,
    },

    /// A breaker must trip after at least one failure
    #[error("Configuration error: failure_threshold must be at least 1")]
    InvalidFailureThreshold,

    /// A fallback does not share the primary's execution model
    #[error(
        "Configuration error: fallback `{fallback}` is {fallback_model} but primary `{primary}` is {primary_model}"
    )]
    ExecutionModelMismatch {
        primary: String,
        primary_model: ExecutionModel,
        fallback: String,
        fallback_model: ExecutionModel,
    },

    /// Breaker names are unique within a registry
    #[error("Configuration error: circuit breaker `{0}` is already registered")]
    DuplicateBreaker(String),

    /// A configuration file could not be read
    #[error("Configuration error: cannot read {path}: {message}")]
    Io { path: String, message: String },

    /// A configuration document could not be parsed
    #[error("Configuration error: invalid document: {0}")]
    Parse(String),
}

impl ConfigurationError {
    /// Create a model mismatch error
    pub fn model_mismatch(
        primary: impl Into<String>,
        primary_model: ExecutionModel,
        fallback: impl Into<String>,
        fallback_model: ExecutionModel,
    ) -> Self {
        Self::ExecutionModelMismatch {
            primary: primary.into(),
            primary_model,
            fallback: fallback.into(),
            fallback_model,
        }
    }
}

impl From<toml::de::Error> for ConfigurationError {
    fn from(error: toml::de::Error) -> Self {
        Self::Parse(error.to_string())
    }
}

/// Rejection returned when a call hits an open circuit.
///
/// The protected operation was never invoked. Decorated callables surface this
/// through their own error type, which must implement `From<CircuitOpenError>`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit breaker open for component: {name}")]
pub struct CircuitOpenError {
    /// Name of the breaker that rejected the call
    pub name: String,
}

impl CircuitOpenError {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicting_options_message_lists_fields() {
        let err = ConfigurationError::ConflictingRetryOptions(vec!["max_attempts", "jitter"]);
        assert_eq!(
            err.to_string(),
            "Configuration error: `policy` cannot be combined with max_attempts, jitter"
        );
    }

    #[test]
    fn test_model_mismatch_message() {
        let err = ConfigurationError::model_mismatch(
            "fetch",
            ExecutionModel::NonBlocking,
            "cached",
            ExecutionModel::Blocking,
        );
        assert!(err.to_string().contains("`cached` is blocking"));
        assert!(err.to_string().contains("`fetch` is non-blocking"));
    }

    #[test]
    fn test_circuit_open_error_names_breaker() {
        let err = CircuitOpenError::new("cb_7");
        assert_eq!(err.to_string(), "Circuit breaker open for component: cb_7");
    }
}
