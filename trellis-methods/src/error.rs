//! Error types for server method registration and invocation.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type returned by every server method invocation.
pub type MethodResult<T = serde_json::Value> = Result<T, MethodError>;

/// Errors raised while registering a server method.
///
/// These are setup-time failures: a server whose methods fail to register
/// should not start serving.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The qualified name is empty, has an empty or purely numeric segment,
    /// or contains characters outside `[A-Za-z0-9_$]`.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// A method is already registered under this exact name.
    #[error("Server method function name already exists: {0}")]
    AlreadyExists(String),

    /// A prefix of the name is already a method, so nothing can nest under it.
    #[error("Invalid segment {segment} in reach path  {name}")]
    NestedThroughMethod { segment: String, name: String },

    /// The name is already a group of methods (e.g. `tools` after `tools.add`).
    #[error("Server method name is already a method group: {0}")]
    GroupConflict(String),

    /// A cache policy was given without `generate_timeout`.
    #[error("Method caching requires a timeout value in generateTimeout: {0}")]
    MissingGenerateTimeout(String),

    /// The cache policy is internally inconsistent.
    #[error("Invalid cache policy configuration ({name}): {reason}")]
    InvalidCachePolicy { name: String, reason: String },
}

/// Errors delivered to the caller of a single invocation.
///
/// Cloneable so that one generation outcome can be handed to every caller
/// waiting on the same cache key.
#[derive(Debug, Error, Clone)]
pub enum MethodError {
    /// The method reported a failure (returned an error or passed one to `next`).
    #[error("{0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),

    /// The method panicked while running.
    #[error("{0}")]
    Panicked(String),

    /// The cache key could not be derived from the call arguments.
    #[error("Invalid method key when invoking: {0}")]
    InvalidKey(String),

    /// Generation did not finish within `generate_timeout`.
    #[error("Service Unavailable: generating {name} exceeded {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    /// A callback-style method dropped its continuation without calling it.
    #[error("Method {0} completed without a result")]
    NoResult(String),

    /// The cache store failed.
    #[error("Cache error: {0}")]
    Store(String),
}

impl MethodError {
    /// Build a failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        MethodError::Failed(Arc::new(Message(message.into())))
    }

    /// Wrap an arbitrary error.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        MethodError::Failed(Arc::new(error))
    }

    /// Whether this is a generation timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MethodError::Timeout { .. })
    }

    /// HTTP status code the error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            MethodError::Timeout { .. } => 503,
            _ => 500,
        }
    }
}

impl From<crate::store::CacheError> for MethodError {
    fn from(error: crate::store::CacheError) -> Self {
        MethodError::Store(error.to_string())
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_messages() {
        assert_eq!(
            RegistrationError::AlreadyExists("tools.add".into()).to_string(),
            "Server method function name already exists: tools.add"
        );
        assert_eq!(
            RegistrationError::NestedThroughMethod {
                segment: "another".into(),
                name: "add.another".into()
            }
            .to_string(),
            "Invalid segment another in reach path  add.another"
        );
        assert_eq!(
            RegistrationError::MissingGenerateTimeout("test".into()).to_string(),
            "Method caching requires a timeout value in generateTimeout: test"
        );
    }

    #[test]
    fn test_method_error_display() {
        assert_eq!(MethodError::msg("boom").to_string(), "boom");
        assert_eq!(
            MethodError::InvalidKey("user".into()).to_string(),
            "Invalid method key when invoking: user"
        );
    }

    #[test]
    fn test_timeout_status() {
        let err = MethodError::Timeout {
            name: "user".into(),
            timeout: Duration::from_millis(3),
        };
        assert!(err.is_timeout());
        assert_eq!(err.status_code(), 503);
        assert_eq!(MethodError::msg("x").status_code(), 500);
    }
}
