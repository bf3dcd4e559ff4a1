//! Error taxonomy for docql.
//!
//! Every failure that can end a resolution pass is a [`LinkError`]. Failures
//! reported by the document store are wrapped as [`BackendError`], which keeps
//! a typed code and the store's structured payload so callers can tell
//! validation failures apart from transient ones.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type used throughout the engine.
pub type LinkResult<T> = Result<T, LinkError>;

/// Typed error codes reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum BackendErrorCode {
    // Request errors
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    OutOfRange,

    // Auth errors
    PermissionDenied,
    Unauthenticated,

    // Transient errors
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,

    // Benign cancellation
    Aborted,
    Cancelled,

    // Internal errors
    Internal,
    Unknown,
}

impl BackendErrorCode {
    /// Returns the string representation of the error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Unavailable => "UNAVAILABLE",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Aborted => "ABORTED",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns true if retrying the same request may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::DeadlineExceeded | Self::ResourceExhausted
        )
    }

    /// Returns true if the request itself was rejected.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument
                | Self::NotFound
                | Self::AlreadyExists
                | Self::FailedPrecondition
                | Self::OutOfRange
                | Self::PermissionDenied
                | Self::Unauthenticated
        )
    }

    /// Returns true for abort signals, which are never surfaced to callers.
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted | Self::Cancelled)
    }
}

impl fmt::Display for BackendErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failure reported by the document store.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("[{code}] {message}")]
pub struct BackendError {
    /// Typed error code.
    pub code: BackendErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Structured payload from the store, when it sent one.
    pub details: Option<serde_json::Value>,
}

impl BackendError {
    /// Creates a new error with the given code and message.
    pub fn new(code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attaches the store's structured error payload.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::NotFound, message)
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::InvalidArgument, message)
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::Unavailable, message)
    }

    /// Creates an abort signal.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::Aborted, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::Internal, message)
    }

    /// Returns true if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// An error that ends a resolution pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// A required directive argument is missing or has the wrong shape.
    #[error("configuration error: {0}")]
    Config(String),

    /// The mutation type does not fit the kind of the target reference.
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    /// A field has neither a directive nor a resolved parent to read from.
    #[error("resolution error on `{field}`: {message}")]
    Resolution { field: String, message: String },

    /// The document store failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The pass was aborted.
    #[error("operation aborted")]
    Aborted,
}

impl LinkError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an invalid mutation error.
    pub fn invalid_mutation(message: impl Into<String>) -> Self {
        Self::InvalidMutation(message.into())
    }

    /// Creates a resolution error for a field.
    pub fn resolution(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true for abort signals, which are swallowed instead of surfaced.
    pub fn is_benign(&self) -> bool {
        match self {
            Self::Aborted => true,
            Self::Backend(err) => err.code.is_abort(),
            Self::Config(_) | Self::InvalidMutation(_) | Self::Resolution { .. } => false,
        }
    }

    /// Returns the backend error, if this error wraps one.
    pub fn backend(&self) -> Option<&BackendError> {
        match self {
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}
