//! Error Types
//!
//! Typed errors for the strategy core. Every failure a caller can observe
//! carries a discriminable [`ErrorKind`], so callers branch on kind instead of
//! matching message strings.
//!
//! # Propagation
//!
//! - Selection and cache errors propagate immediately.
//! - Adapter invocation errors are intercepted once for a fallback search.
//! - Persistence errors are logged and swallowed by the components that
//!   persist; they only surface from the gateway itself.

use thiserror::Error;

use crate::adapter::AdapterError;

/// Result alias used throughout the crate
pub type StrategyResult<T> = Result<T, StrategyError>;

/// Discriminant of a [`StrategyError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad registration input
    InvalidDescriptor,
    /// Unknown adapter id
    ModelNotFound,
    /// No adapter passed filtering
    NoEligibleModel,
    /// The adapter call failed or timed out
    AdapterInvocation,
    /// The security hook rejected the request
    SecurityDenied,
    /// Every fallback candidate failed
    AllFallbacksFailed,
    /// Persistence gateway failure
    Persistence,
}

impl ErrorKind {
    /// Stable snake_case name, used in error events
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidDescriptor => "invalid_descriptor",
            Self::ModelNotFound => "model_not_found",
            Self::NoEligibleModel => "no_eligible_model",
            Self::AdapterInvocation => "adapter_invocation",
            Self::SecurityDenied => "security_denied",
            Self::AllFallbacksFailed => "all_fallbacks_failed",
            Self::Persistence => "persistence",
        }
    }
}

/// Errors surfaced by the strategy core
#[derive(Clone, Debug, Error)]
pub enum StrategyError {
    /// Registration input is missing a field or carries an unknown tier
    #[error("Invalid model descriptor: {0}")]
    InvalidDescriptor(String),

    /// No adapter with this id is registered
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Filtering left no candidate for the request context
    #[error("No eligible model for task type '{task_type}'")]
    NoEligibleModel {
        /// Task type of the normalized context
        task_type: String,
    },

    /// The adapter call failed
    #[error("Adapter {adapter_id} invocation failed: {source}")]
    AdapterInvocation {
        /// Adapter that was invoked
        adapter_id: String,
        /// Underlying adapter failure
        #[source]
        source: AdapterError,
    },

    /// The security hook rejected the request before the adapter was invoked
    #[error("Request to {adapter_id} rejected by security check: {reason}")]
    SecurityDenied {
        /// Adapter the request was addressed to
        adapter_id: String,
        /// Reason given by the validator
        reason: String,
    },

    /// The original call and every fallback failed
    #[error("All fallbacks failed for {original_model_id}: {original}")]
    AllFallbacksFailed {
        /// Adapter whose failure triggered the fallback search
        original_model_id: String,
        /// The error that triggered the fallback search
        original: Box<StrategyError>,
        /// Error of the last fallback attempted, if any candidate existed
        last: Option<Box<StrategyError>>,
    },

    /// Persistence gateway failure
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl StrategyError {
    /// Kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDescriptor(_) => ErrorKind::InvalidDescriptor,
            Self::ModelNotFound(_) => ErrorKind::ModelNotFound,
            Self::NoEligibleModel { .. } => ErrorKind::NoEligibleModel,
            Self::AdapterInvocation { .. } => ErrorKind::AdapterInvocation,
            Self::SecurityDenied { .. } => ErrorKind::SecurityDenied,
            Self::AllFallbacksFailed { .. } => ErrorKind::AllFallbacksFailed,
            Self::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Whether this error came from a timed-out adapter call
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::AdapterInvocation {
                source: AdapterError::Timeout,
                ..
            }
        )
    }
}

/// Errors from a persistence gateway
#[derive(Clone, Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure
    #[error("Persistence I/O error: {0}")]
    Io(String),

    /// Payload could not be (de)serialized
    #[error("Persistence serialization error: {0}")]
    Serialization(String),

    /// Requested namespace or file does not exist
    #[error("Persisted entry not found: {namespace}/{filename}")]
    NotFound {
        /// Namespace searched
        namespace: String,
        /// File requested
        filename: String,
    },

    /// Backend-specific failure
    #[error("Persistence backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            StrategyError::ModelNotFound("x".into()).kind(),
            ErrorKind::ModelNotFound
        );
        assert_eq!(
            StrategyError::NoEligibleModel {
                task_type: "general".into()
            }
            .kind(),
            ErrorKind::NoEligibleModel
        );
        let persistence: StrategyError = PersistenceError::Backend("down".into()).into();
        assert_eq!(persistence.kind(), ErrorKind::Persistence);
        assert_eq!(ErrorKind::AllFallbacksFailed.as_str(), "all_fallbacks_failed");
    }

    #[test]
    fn test_timeout_detection() {
        let timeout = StrategyError::AdapterInvocation {
            adapter_id: "a".into(),
            source: AdapterError::Timeout,
        };
        assert!(timeout.is_timeout());

        let failed = StrategyError::AdapterInvocation {
            adapter_id: "a".into(),
            source: AdapterError::RequestFailed("500".into()),
        };
        assert!(!failed.is_timeout());
    }

    #[test]
    fn test_all_fallbacks_failed_display() {
        let err = StrategyError::AllFallbacksFailed {
            original_model_id: "primary".into(),
            original: Box::new(StrategyError::AdapterInvocation {
                adapter_id: "primary".into(),
                source: AdapterError::Timeout,
            }),
            last: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("primary"));
        assert!(msg.contains("timed out"));
    }
}
