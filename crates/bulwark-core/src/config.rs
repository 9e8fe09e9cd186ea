//! File-based resilience configuration
//!
//! Durations are written as humantime strings:
//!
//! ```toml
//! [retry]
//! max_attempts = 4
//! base_delay = "250ms"
//! backoff = "exponential"
//! max_delay = "10s"
//! jitter = false
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! recovery_timeout = "45s"
//! ```
//!
//! Missing sections and fields take their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigResult, ConfigurationError};
use crate::recovery::{CircuitBreakerConfig, RetryConfig, RetryPolicy};

/// Retry and circuit breaker settings loaded from a file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ResilienceConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No resilience config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigurationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.retry.validate()?;
        self.circuit_breaker.validate()
    }

    /// Retry policy described by the `[retry]` section
    pub fn retry_policy(&self) -> ConfigResult<RetryPolicy> {
        RetryPolicy::from_config(self.retry.clone())
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string(self).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::Backoff;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ResilienceConfig::from_toml_str("").unwrap();
        assert_eq!(config, ResilienceConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parses_humantime_durations() {
        let config = ResilienceConfig::from_toml_str(
            r#"
            [retry]
            max_attempts = 4
            base_delay = "250ms"
            backoff = "linear"
            max_delay = "10s"
            jitter = false

            [circuit_breaker]
            recovery_timeout = "1m 30s"
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.backoff, Backoff::Linear);
        assert!(!config.retry.jitter);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(90));

        let policy = config.retry_policy().unwrap();
        assert_eq!(policy.max_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert_eq!(
            ResilienceConfig::from_toml_str("[retry]\nmax_attempts = 0"),
            Err(ConfigurationError::InvalidMaxAttempts(0))
        );
        assert_eq!(
            ResilienceConfig::from_toml_str("[circuit_breaker]\nfailure_threshold = 0"),
            Err(ConfigurationError::InvalidFailureThreshold)
        );
        assert!(matches!(
            ResilienceConfig::from_toml_str("[retry]\nbase_delay = \"5s\"\nmax_delay = \"1s\""),
            Err(ConfigurationError::MaxDelayBelowBaseDelay { .. })
        ));
        assert!(matches!(
            ResilienceConfig::from_toml_str("[retry]\nbase_delay = \"soon\""),
            Err(ConfigurationError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("resilience.toml");
        fs::write(&path, "[circuit_breaker]\nfailure_threshold = 2\n").unwrap();

        let config = ResilienceConfig::from_file(&path).unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = ResilienceConfig::from_file(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ResilienceConfig::default());
    }

    #[test]
    fn test_unreadable_path_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        // A directory exists but cannot be read as a file
        let result = ResilienceConfig::from_file(temp_dir.path());
        assert!(matches!(result, Err(ConfigurationError::Io { .. })));
    }

    #[test]
    fn test_toml_round_trip_keeps_durations_readable() {
        let rendered = ResilienceConfig::default().to_toml_string().unwrap();
        assert!(rendered.contains("recovery_timeout = \"30s\""));
        assert_eq!(
            ResilienceConfig::from_toml_str(&rendered).unwrap(),
            ResilienceConfig::default()
        );
    }
}
