//! Error types for the profiling agent.
//!
//! Only configuration is fallible from the caller's point of view. Everything
//! that goes wrong once the agent runs is logged and swallowed by the task that
//! hit it, so these types mostly travel as far as a `warn!` call.

use std::path::PathBuf;

use thiserror::Error;

use crate::kind::ProfileKind;

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The service name identifies every sample and cannot be empty.
    #[error("service name is required")]
    EmptyServiceName,

    /// The service name ends up in file names and cannot hold a path separator.
    #[error("service name '{name}' must not contain '/' or '\\'")]
    InvalidServiceName { name: String },

    /// A period or duration that must be positive was zero.
    #[error("{field} must be greater than 0")]
    ZeroDuration { field: &'static str },

    /// A URL option could not be parsed.
    #[error("invalid URL '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },

    /// A profile kind name did not match the catalogue.
    #[error("unknown profile kind '{name}'")]
    UnknownProfileKind { name: String },

    /// An environment variable held an unusable value.
    #[error("invalid value '{value}' for {key}")]
    InvalidEnvValue { key: String, value: String },

    /// A settings file could not be read or parsed.
    #[error("failed to load settings from '{path}': {reason}")]
    SettingsLoadFailed { path: PathBuf, reason: String },
}

impl Error {
    /// Create a zero duration error.
    pub const fn zero_duration(field: &'static str) -> Self {
        Self::ZeroDuration { field }
    }

    /// Create an invalid service name error.
    pub fn invalid_service_name(name: impl Into<String>) -> Self {
        Self::InvalidServiceName { name: name.into() }
    }

    /// Create an invalid URL error.
    pub fn invalid_url(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown profile kind error.
    pub fn unknown_profile_kind(name: impl Into<String>) -> Self {
        Self::UnknownProfileKind { name: name.into() }
    }

    /// Create an invalid environment value error.
    pub fn invalid_env_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidEnvValue {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a settings load error.
    pub fn settings_load_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::SettingsLoadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors reported by a [`RuntimeProvider`](crate::provider::RuntimeProvider).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider cannot sample this kind. Collection moves on to the next kind.
    #[error("{kind} profile not available")]
    KindUnavailable { kind: ProfileKind },

    /// A duration capture is already running.
    #[error("{kind} capture already in progress")]
    CaptureBusy { kind: ProfileKind },

    /// The provider failed while capturing.
    #[error("{kind} capture failed: {reason}")]
    CaptureFailed { kind: ProfileKind, reason: String },
}

impl ProviderError {
    /// Create a kind unavailable error.
    pub const fn unavailable(kind: ProfileKind) -> Self {
        Self::KindUnavailable { kind }
    }

    /// Create a capture failed error.
    pub fn capture_failed(kind: ProfileKind, reason: impl Into<String>) -> Self {
        Self::CaptureFailed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Failure of a single publish attempt. Logged by the publisher and dropped.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Envelope could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client could not be initialized.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// Request never produced a response.
    #[error("request to {target} failed: {source}")]
    Transport {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    /// Collector answered with something other than 200.
    #[error("{target} answered with status {status}")]
    UnexpectedStatus { target: String, status: u16 },

    /// Local file could not be written.
    #[error("failed to write '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::zero_duration("interval");
        assert_eq!(err.to_string(), "interval must be greater than 0");

        let err = Error::invalid_url("not a url", "relative URL without a base");
        assert!(err.to_string().contains("not a url"));

        let err = Error::invalid_service_name("a/b");
        assert_eq!(err.to_string(), "service name 'a/b' must not contain '/' or '\\'");
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::unavailable(ProfileKind::Mutex);
        assert_eq!(err.to_string(), "mutex profile not available");

        let err = ProviderError::capture_failed(ProfileKind::Cpu, "lock poisoned");
        assert!(err.to_string().contains("lock poisoned"));
    }

    #[test]
    fn test_publish_error_status() {
        let err = PublishError::UnexpectedStatus {
            target: "http://127.0.0.1:8588".to_string(),
            status: 503,
        };
        assert!(err.to_string().contains("503"));
    }
}
