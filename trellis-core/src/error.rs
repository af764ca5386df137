// Error types for Trellis

use http::StatusCode;
use thiserror::Error;
use trellis_methods::{MethodError, RegistrationError};

pub type Result<T> = std::result::Result<T, Error>;

/// Request-time errors. Every variant maps to an HTTP status.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service Unavailable: {0}")]
    ServiceUnavailable(String),

    /// Any status, for handlers that need one not listed above.
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    #[error(transparent)]
    Method(#[from] MethodError),

    #[error(transparent)]
    Route(#[from] RouteError),
}

impl Error {
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Error::Status {
            status,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Status { status, .. } => *status,
            Error::Method(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Error::Internal(_) | Error::Route(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

/// Errors raised while building routes. Fatal at setup time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Route options missing path")]
    MissingPath,

    #[error("Route options missing method")]
    MissingMethod,

    #[error("Invalid method name: {0}")]
    InvalidMethod(String),

    #[error("Handler must appear once and only once")]
    Handler,

    #[error("Invalid path: {path} ({reason})")]
    InvalidPath { path: String, reason: String },

    #[error("New route {path} conflicts with existing {existing}")]
    Conflict { path: String, existing: String },

    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Invalid handler options for {handler}: {reason}")]
    HandlerOptions { handler: String, reason: String },

    #[error("Invalid prerequisite method string: {0}")]
    InvalidPrerequisite(String),

    #[error("Handler type already defined: {0}")]
    DuplicateHandlerType(String),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Logging initialization failed: {0}")]
    LoggingError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
