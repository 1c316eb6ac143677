//! Error types for the RPC client.
//!
//! Every failure surfaced to callers is an [`RpcError`] tagged with exactly one
//! [`ErrorKind`]. Raw transport failures are converted by [`classify`], a pure
//! mapping that never drops a failure: anything unrecognized becomes
//! [`ErrorKind::Unknown`].

mod mapping;

pub use mapping::classify;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for RPC client operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Canonical error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request was rejected as malformed.
    Validation,
    /// The caller is not authenticated.
    Authentication,
    /// The caller lacks permission.
    Authorization,
    /// The requested entity does not exist.
    NotFound,
    /// The entity being created already exists.
    AlreadyExists,
    /// A deadline expired.
    Timeout,
    /// The server is throttling the caller.
    RateLimit,
    /// The server failed internally.
    InternalServer,
    /// The service is temporarily unavailable.
    ServiceUnavailable,
    /// The connection could not be established or was lost.
    Connection,
    /// The operation was cancelled.
    Cancelled,
    /// The operation was aborted by the server.
    Aborted,
    /// The system is not in the state the operation requires.
    PreconditionFailed,
    /// The server does not implement the operation.
    NotImplemented,
    /// Every allowed attempt failed.
    MaxRetriesExceeded,
    /// Unrecognized failure.
    Unknown,
}

impl ErrorKind {
    /// Returns true if this kind is retried when no policy override exists.
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(
            self,
            ErrorKind::Connection
                | ErrorKind::Timeout
                | ErrorKind::ServiceUnavailable
                | ErrorKind::InternalServer
                | ErrorKind::RateLimit
        )
    }

    /// Returns true if this kind counts as a backend failure for the circuit breaker.
    ///
    /// Everything else means the backend answered, which the breaker treats
    /// as a healthy response.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            ErrorKind::Connection
                | ErrorKind::Timeout
                | ErrorKind::ServiceUnavailable
                | ErrorKind::InternalServer
        )
    }

    /// Stable snake_case name, used for metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::InternalServer => "internal_server",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Connection => "connection",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Aborted => "aborted",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::MaxRetriesExceeded => "max_retries_exceeded",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::Validation => "Validation error",
            ErrorKind::Authentication => "Authentication failed",
            ErrorKind::Authorization => "Authorization failed",
            ErrorKind::NotFound => "Not found",
            ErrorKind::AlreadyExists => "Already exists",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::RateLimit => "Rate limit exceeded",
            ErrorKind::InternalServer => "Internal server error",
            ErrorKind::ServiceUnavailable => "Service unavailable",
            ErrorKind::Connection => "Connection error",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Aborted => "Aborted",
            ErrorKind::PreconditionFailed => "Precondition failed",
            ErrorKind::NotImplemented => "Not implemented",
            ErrorKind::MaxRetriesExceeded => "Max retries exceeded",
            ErrorKind::Unknown => "Unknown error",
        };
        f.write_str(text)
    }
}

/// RPC error with structured context.
///
/// Errors are immutable once built; the `with_*` methods consume and return
/// the value during construction only.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    kind: ErrorKind,
    message: String,
    status_code: Option<i32>,
    details: HashMap<String, serde_json::Value>,
    retry_after: Option<Duration>,
    reset_at: Option<DateTime<Utc>>,
    attempt_count: Option<u32>,
    last_error: Option<Box<RpcError>>,
    circuit_open_for: Option<Duration>,
    #[source]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl RpcError {
    /// Creates a new error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            details: HashMap::new(),
            retry_after: None,
            reset_at: None,
            attempt_count: None,
            last_error: None,
            circuit_open_for: None,
            cause: None,
        }
    }

    /// Sets the numeric status code.
    pub fn with_status_code(mut self, code: i32) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Adds a structured detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Sets the server-requested retry delay.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Sets the time at which a rate limit resets.
    pub fn with_reset_at(mut self, reset_at: DateTime<Utc>) -> Self {
        self.reset_at = Some(reset_at);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the status code if one was reported.
    pub fn status_code(&self) -> Option<i32> {
        self.status_code
    }

    /// Returns the structured details.
    pub fn details(&self) -> &HashMap<String, serde_json::Value> {
        &self.details
    }

    /// Returns the server-requested retry delay.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Returns when the rate limit resets.
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        self.reset_at
    }

    /// Returns the number of attempts made, for `MaxRetriesExceeded`.
    pub fn attempt_count(&self) -> Option<u32> {
        self.attempt_count
    }

    /// Returns the last attempt's error, for `MaxRetriesExceeded`.
    pub fn last_error(&self) -> Option<&RpcError> {
        self.last_error.as_deref()
    }

    /// Returns how long the circuit had been open when the call was rejected.
    pub fn circuit_open_for(&self) -> Option<Duration> {
        self.circuit_open_for
    }

    /// Returns true if this error is a circuit breaker rejection.
    pub fn is_circuit_open(&self) -> bool {
        self.circuit_open_for.is_some()
    }

    /// Returns true if the kind is retryable by default.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable_by_default()
    }

    // Convenience constructors

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    /// Creates a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Creates a circuit-open rejection.
    pub fn circuit_open(open_for: Duration) -> Self {
        let mut err = Self::new(
            ErrorKind::ServiceUnavailable,
            format!(
                "Circuit breaker open for {}ms, call rejected without reaching the transport",
                open_for.as_millis()
            ),
        )
        .with_detail("circuit_open_ms", open_for.as_millis() as u64);
        err.circuit_open_for = Some(open_for);
        err
    }

    /// Creates the terminal error raised once every attempt has failed.
    pub fn max_retries_exceeded(attempt_count: u32, last_error: RpcError) -> Self {
        let mut err = Self::new(
            ErrorKind::MaxRetriesExceeded,
            format!(
                "Gave up after {} attempts, last error: {}",
                attempt_count, last_error
            ),
        )
        .with_detail("attempt_count", attempt_count)
        .with_detail("last_error_kind", last_error.kind.as_str());
        err.attempt_count = Some(attempt_count);
        err.status_code = last_error.status_code;
        err.cause = Some(Arc::new(last_error.clone()));
        err.last_error = Some(Box::new(last_error));
        err
    }
}

impl From<crate::transport::RawFailure> for RpcError {
    fn from(failure: crate::transport::RawFailure) -> Self {
        classify(&failure)
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        classify(&crate::transport::RawFailure::from(err))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::validation(format!("Serialization error: {}", err)).with_cause(err)
    }
}

impl From<url::ParseError> for RpcError {
    fn from(err: url::ParseError) -> Self {
        RpcError::validation(format!("Invalid address: {}", err)).with_cause(err)
    }
}
